use std::{ffi::CString, os::raw::{c_char, c_int, c_void}, ptr};
use tracing::info;

use crate::executor::{InferenceExecutor, RawOutput};
use crate::preprocess::{ModelConfig, Tensor};
use crate::{PipelineError, PipelineResult};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

/// Float32 TFLite detector (e.g. a YOLOv8 export with `[1, 4+C, N]` output).
pub struct TfliteExecutor {
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
}

// The interpreter is only ever driven from one frame task at a time.
unsafe impl Send for TfliteExecutor {}

impl TfliteExecutor {
    pub fn new(cfg: &ModelConfig) -> PipelineResult<Self> {
        let cpath = CString::new(cfg.path.as_str())
            .map_err(|e| PipelineError::Load(format!("bad model path {}: {}", cfg.path, e)))?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        if model.is_null() {
            return Err(PipelineError::Load(format!("failed to load tflite model: {}", cfg.path)));
        }

        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        let mut me = Self { model, opts, interp: ptr::null_mut() };
        if opts.is_null() {
            return Err(PipelineError::Load("failed to create tflite options".into()));
        }
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, cfg.num_threads.unwrap_or(2)); }

        me.interp = unsafe { TfLiteInterpreterCreate(model, opts) };
        if me.interp.is_null() {
            return Err(PipelineError::Load("failed to create tflite interpreter".into()));
        }
        let rc = unsafe { TfLiteInterpreterAllocateTensors(me.interp) };
        if rc != 0 {
            return Err(PipelineError::Load("TfLiteInterpreterAllocateTensors failed".into()));
        }

        info!("executor: loaded TFLite model: {}", cfg.path);
        Ok(me)
    }

    pub fn inspect(&mut self) -> PipelineResult<String> {
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        let out0 = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        if input.is_null() || out0.is_null() {
            return Err(PipelineError::infer("model has no input/output tensor 0"));
        }
        let (in_dims, in_bytes) = (tensor_dims(input), unsafe { TfLiteTensorByteSize(input) });
        let (out_dims, out_bytes) = (tensor_dims(out0), unsafe { TfLiteTensorByteSize(out0) });

        Ok(format!(
            "TFLite inspect:\n- input[0] dims={:?} bytes={}\n- output[0] dims={:?} bytes={}\n",
            in_dims, in_bytes, out_dims, out_bytes
        ))
    }
}

impl InferenceExecutor for TfliteExecutor {
    fn name(&self) -> &'static str { "tflite" }

    fn infer(&mut self, input: &Tensor) -> PipelineResult<RawOutput> {
        let in_t = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        if in_t.is_null() {
            return Err(PipelineError::infer("no input tensor"));
        }
        let in_bytes = unsafe { TfLiteTensorByteSize(in_t) };
        let need = input.data.len() * std::mem::size_of::<f32>();
        if in_bytes != need {
            return Err(PipelineError::infer(format!(
                "input size mismatch: model wants {} bytes, tensor {:?} has {}",
                in_bytes, input.shape, need
            )));
        }
        let in_ptr = unsafe { TfLiteTensorData(in_t) as *mut f32 };
        if in_ptr.is_null() {
            return Err(PipelineError::infer("null input tensor data"));
        }
        unsafe { ptr::copy_nonoverlapping(input.data.as_ptr(), in_ptr, input.data.len()); }

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        if rc != 0 {
            return Err(PipelineError::infer(format!("TfLiteInterpreterInvoke returned {}", rc)));
        }

        let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        if out.is_null() {
            return Err(PipelineError::infer("no output tensor 0"));
        }
        let out_ptr = unsafe { TfLiteTensorData(out) as *const f32 };
        if out_ptr.is_null() {
            return Err(PipelineError::infer("null output tensor data"));
        }
        let out_len = unsafe { TfLiteTensorByteSize(out) } / std::mem::size_of::<f32>();
        let data = unsafe { std::slice::from_raw_parts(out_ptr, out_len) }.to_vec();
        let shape = tensor_dims(out).into_iter().map(|d| d.max(0) as usize).collect();

        Ok(RawOutput { data, shape })
    }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        (0..nd).map(|i| TfLiteTensorDim(t, i)).collect()
    }
}

impl Drop for TfliteExecutor {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
    }
}

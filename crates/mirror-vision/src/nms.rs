use crate::{BBox, Detection};

pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let ix_a = a.x1.max(b.x1);
    let iy_a = a.y1.max(b.y1);
    let ix_b = a.x2.min(b.x2);
    let iy_b = a.y2.min(b.y2);

    let iw = (ix_b - ix_a).max(0.0);
    let ih = (iy_b - iy_a).max(0.0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Greedy NMS. Candidates at or below `score_th` never enter; a candidate is
/// dropped when its IoU with an already kept box exceeds `iou_th`.
pub fn suppress(mut dets: Vec<Detection>, max_det: usize, iou_th: f32, score_th: f32) -> Vec<Detection> {
    dets.retain(|d| d.score > score_th);
    // stable: equal scores keep candidate order
    dets.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<Detection> = Vec::new();
    'outer: for d in dets {
        if kept.len() >= max_det { break; }
        for k in &kept {
            if iou(&d.bbox, &k.bbox) > iou_th {
                continue 'outer;
            }
        }
        kept.push(d);
    }
    kept
}

//! `mirror run`: the session loop. It is the only writer of the game session;
//! timers, clips, the frame worker and stdin all post into one channel.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use mirror_game::clips::{ClipHandle, ClipPlayer, ClipPolicy};
use mirror_game::timer::CountdownTimer;
use mirror_game::{Effect, GameEvent, GameMachine};
use mirror_proto::notification::{Notification, NotificationKind};
use mirror_vision::pipeline::Pipeline;
use mirror_vision::preprocess::Preprocessor;
use mirror_vision::voting::VotingEngine;
use mirror_vision::{executor, ClassCatalog};

use crate::frames::{FrameCmd, FrameWorker};
use crate::Config;

#[derive(Debug)]
pub enum SessionEvent {
    Game(GameEvent),
    ClipFinished { id: u64 },
    Notify(Notification),
    /// The frame worker hit `runtime.max_frames`.
    FramesDone,
    InputClosed,
}

/// Map one stdin line to an event. Unknown words yield `None`.
pub fn parse_command(line: &str) -> Option<GameEvent> {
    match line.trim().to_ascii_lowercase().as_str() {
        "learn" | "l" => Some(GameEvent::SwitchToLearning),
        "game" | "g" => Some(GameEvent::SwitchToGame),
        "skip" | "s" => Some(GameEvent::Skip),
        "quit" | "q" => Some(GameEvent::Quit),
        "open" | "o" => Some(GameEvent::OpenCamera),
        "status" | "?" => Some(GameEvent::Status),
        _ => None,
    }
}

fn emit(n: &Notification) {
    match serde_json::to_string(n) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("notification encode failed: {}", e),
    }
    if n.kind.is_error() {
        warn!("{:?}: {} {}", n.kind, n.title, n.detail.as_deref().unwrap_or(""));
    } else {
        info!("{:?}: {} {}", n.kind, n.title, n.detail.as_deref().unwrap_or(""));
    }
}

fn build_pipeline(cfg: &Config) -> Result<Pipeline> {
    let catalog = ClassCatalog::from_config(&cfg.catalog);
    anyhow::ensure!(!catalog.is_empty(), "catalog.classes is empty");
    let exec = executor::load(&cfg.model)?;
    Ok(Pipeline::new(
        Preprocessor::new(&cfg.model),
        exec,
        catalog,
        cfg.postprocess.clone(),
        cfg.overlay.clone(),
        VotingEngine::new(cfg.voting.threshold),
        &cfg.runtime.pipeline(),
    ))
}

/// Effects that outlive one `apply`: running timers and the playing clip.
/// The countdown is held while a clip plays and picks up again from the
/// machine's remaining seconds.
struct Runtime {
    tx: mpsc::Sender<SessionEvent>,
    frames: mpsc::Sender<FrameCmd>,
    player: ClipPlayer,
    timer: Option<CountdownTimer>,
    /// Epoch of the countdown held by the playing clip.
    paused: Option<u64>,
    advance: Option<CountdownTimer>,
    clip: Option<ClipHandle>,
}

impl Runtime {
    fn new(tx: mpsc::Sender<SessionEvent>, frames: mpsc::Sender<FrameCmd>, player: ClipPlayer) -> Self {
        Self { tx, frames, player, timer: None, paused: None, advance: None, clip: None }
    }

    /// Feed one game event through the machine. Recognitions are dropped
    /// while a clip plays.
    async fn game(&mut self, machine: &mut GameMachine, ev: GameEvent) {
        if let (GameEvent::Recognized(name), Some(_)) = (&ev, &self.clip) {
            debug!("session: ignoring {} while a clip plays", name);
            return;
        }
        let fx = machine.apply(ev);
        self.perform(fx, machine.session().timer_seconds_remaining).await;
    }

    /// `remaining` is the countdown left in the machine after `effects`.
    async fn perform(&mut self, effects: Vec<Effect>, remaining: u32) {
        for fx in effects {
            debug!("session: {:?}", fx);
            match fx {
                Effect::Notify(n) => emit(&n),
                Effect::StartTimer { epoch, seconds } => {
                    if self.clip.is_some() {
                        self.timer = None;
                        self.paused = Some(epoch);
                    } else {
                        self.timer = Some(CountdownTimer::spawn(epoch, seconds, self.tx.clone(), SessionEvent::Game));
                    }
                }
                Effect::StopTimer => {
                    self.timer = None;
                    self.paused = None;
                    self.advance = None;
                }
                Effect::ScheduleAdvance { epoch, delay } => {
                    self.advance = Some(CountdownTimer::schedule(
                        delay,
                        GameEvent::AdvanceRound { epoch },
                        self.tx.clone(),
                        SessionEvent::Game,
                    ));
                }
                Effect::PlayClip(name) => {
                    if let Some(old) = self.clip.take() {
                        old.cancel();
                    }
                    if let Some(t) = self.timer.take() {
                        debug!("session: countdown {} held for clip", t.epoch);
                        self.paused = Some(t.epoch);
                    }
                    self.send_frames(FrameCmd::Suspend).await;
                    let handle = self
                        .player
                        .play(&name, self.tx.clone(), |id| SessionEvent::ClipFinished { id });
                    self.clip = Some(handle);
                }
                Effect::CancelClip => {
                    if let Some(clip) = self.clip.take() {
                        clip.cancel();
                        self.clip_over(remaining).await;
                    }
                }
                Effect::SetDetecting(on) => self.send_frames(FrameCmd::SetDetecting(on)).await,
                Effect::StartCamera => self.send_frames(FrameCmd::OpenCamera).await,
            }
        }
    }

    async fn clip_finished(&mut self, id: u64, remaining: u32) {
        if self.clip.as_ref().map(|c| c.id) != Some(id) {
            debug!("session: stale clip {} finished", id);
            return;
        }
        self.clip = None;
        self.clip_over(remaining).await;
    }

    async fn clip_over(&mut self, remaining: u32) {
        if let Some(epoch) = self.paused.take() {
            debug!("session: countdown {} resumes at {}s", epoch, remaining);
            self.timer = Some(CountdownTimer::spawn(epoch, remaining, self.tx.clone(), SessionEvent::Game));
        }
        self.send_frames(FrameCmd::Resume).await;
    }

    async fn send_frames(&self, cmd: FrameCmd) {
        if self.frames.send(cmd).await.is_err() {
            debug!("session: frame worker is gone");
        }
    }
}

fn spawn_stdin(tx: mpsc::Sender<SessionEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_command(&line) {
                    Some(ev) => {
                        if tx.send(SessionEvent::Game(ev)).await.is_err() {
                            return;
                        }
                    }
                    None => warn!("unknown command {:?} (learn, game, skip, quit, open, status)", line.trim()),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin: {}", e);
                    break;
                }
            }
        }
        let _ = tx.send(SessionEvent::InputClosed).await;
    });
}

pub(crate) async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let pipeline = match build_pipeline(cfg) {
        Ok(p) => p,
        Err(e) => {
            emit(&Notification::new(NotificationKind::LoadError, "Load Model Error").with_detail(format!("{:#}", e)));
            return Err(e).context("model load");
        }
    };

    let (tx, mut rx) = mpsc::channel::<SessionEvent>(64);
    let (frames_tx, frames_rx) = mpsc::channel::<FrameCmd>(16);

    let overlay_out = cfg
        .overlay
        .output_path
        .clone()
        .map(|p| (p, cfg.overlay.canvas_width, cfg.overlay.canvas_height));
    let worker = FrameWorker::new(
        pipeline,
        cfg.camera.clone(),
        Duration::from_millis(cfg.runtime.frame_interval_ms),
        cfg.runtime.max_frames,
        overlay_out,
        tx.clone(),
    );
    let worker = tokio::spawn(worker.run(frames_rx));

    spawn_stdin(tx.clone());

    let mut machine = GameMachine::new(cfg.game.clone(), ClipPolicy::from_config(&cfg.clips));
    let mut rt = Runtime::new(tx, frames_tx, ClipPlayer::new(&cfg.clips));

    loop {
        let ev = tokio::select! {
            ev = rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
            r = tokio::signal::ctrl_c() => {
                if let Err(e) = r {
                    error!("ctrl-c handler: {}", e);
                }
                info!("run: interrupted");
                break;
            }
        };

        match ev {
            SessionEvent::Game(ev) => rt.game(&mut machine, ev).await,
            SessionEvent::ClipFinished { id } => {
                rt.clip_finished(id, machine.session().timer_seconds_remaining).await
            }
            SessionEvent::Notify(n) => emit(&n),
            SessionEvent::FramesDone => {
                info!("run: frame budget exhausted");
                break;
            }
            SessionEvent::InputClosed => {
                if cfg.runtime.max_frames.is_some() {
                    debug!("run: stdin closed, running until max_frames");
                    continue;
                }
                info!("run: stdin closed");
                break;
            }
        }
    }

    rt.game(&mut machine, GameEvent::Quit).await;
    drop(rt);
    worker.abort();

    let s = machine.session();
    info!("run: done, score {}", s.score);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_game::clips::ClipConfig;
    use mirror_game::GameConfig;

    fn runtime() -> (Runtime, mpsc::Receiver<SessionEvent>, mpsc::Receiver<FrameCmd>) {
        let (tx, rx) = mpsc::channel(32);
        let (frames_tx, frames_rx) = mpsc::channel(32);
        (Runtime::new(tx, frames_tx, ClipPlayer::new(&Default::default())), rx, frames_rx)
    }

    /// A player that never exits on its own, with a `dog` clip on disk.
    fn sleeping_player() -> (ClipPlayer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dog.mp4"), b"").unwrap();
        let player = ClipPlayer::new(&ClipConfig {
            dir: dir.path().display().to_string(),
            player: vec!["sleep".into(), "60".into()],
            ..Default::default()
        });
        (player, dir)
    }

    fn drain(rx: &mut mpsc::Receiver<FrameCmd>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(format!("{:?}", cmd));
        }
        out
    }

    #[test]
    fn commands_parse() {
        assert_eq!(parse_command("learn"), Some(GameEvent::SwitchToLearning));
        assert_eq!(parse_command("  GAME \n"), Some(GameEvent::SwitchToGame));
        assert_eq!(parse_command("s"), Some(GameEvent::Skip));
        assert_eq!(parse_command("quit"), Some(GameEvent::Quit));
        assert_eq!(parse_command("open"), Some(GameEvent::OpenCamera));
        assert_eq!(parse_command("status"), Some(GameEvent::Status));
        assert_eq!(parse_command("dance"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_clip_completion_does_not_resume() {
        let (mut rt, _rx, mut frames_rx) = runtime();
        rt.clip_finished(99, 20).await;
        assert!(frames_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timers_are_replaced_and_stopped() {
        let (mut rt, mut rx, _frames_rx) = runtime();
        rt.perform(vec![Effect::StartTimer { epoch: 1, seconds: 5 }], 5).await;
        rt.perform(vec![Effect::StartTimer { epoch: 2, seconds: 5 }], 5).await;
        match rx.recv().await {
            Some(SessionEvent::Game(GameEvent::TimerTick { epoch })) => assert_eq!(epoch, 2),
            other => panic!("unexpected {:?}", other),
        }
        rt.perform(vec![Effect::StopTimer], 5).await;
        assert!(rt.timer.is_none());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn recognitions_are_dropped_while_a_clip_plays() {
        let (mut rt, _rx, mut frames_rx) = runtime();
        let (player, _clips) = sleeping_player();
        rt.player = player;
        let mut machine = GameMachine::new(
            GameConfig { seed: Some(1), ..Default::default() },
            ClipPolicy::new(&["dog".to_string()], &[]),
        );
        rt.game(&mut machine, GameEvent::SwitchToLearning).await;
        rt.game(&mut machine, GameEvent::Recognized("dog".into())).await;
        assert!(rt.clip.is_some());
        assert_eq!(drain(&mut frames_rx), vec!["SetDetecting(true)", "Suspend"]);

        rt.game(&mut machine, GameEvent::Recognized("cat".into())).await;
        assert_eq!(machine.session().learned_objects, vec!["dog"]);
        assert!(frames_rx.try_recv().is_err());

        let id = rt.clip.as_ref().map(|c| c.id).unwrap();
        rt.clip_finished(id, machine.session().timer_seconds_remaining).await;
        assert_eq!(drain(&mut frames_rx), vec!["Resume"]);
        rt.game(&mut machine, GameEvent::Recognized("cat".into())).await;
        assert_eq!(machine.session().learned_objects, vec!["dog", "cat"]);
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn countdown_is_held_while_a_clip_plays() {
        let (mut rt, mut rx, mut frames_rx) = runtime();
        let (player, _clips) = sleeping_player();
        rt.player = player;
        rt.perform(
            vec![Effect::StartTimer { epoch: 3, seconds: 20 }, Effect::PlayClip("dog".into())],
            20,
        )
        .await;
        assert!(rt.timer.is_none());
        assert_eq!(rt.paused, Some(3));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());

        let id = rt.clip.as_ref().map(|c| c.id).unwrap();
        rt.clip_finished(id, 7).await;
        assert_eq!(drain(&mut frames_rx), vec!["Suspend", "Resume"]);
        assert_eq!(rt.timer.as_ref().map(|t| t.epoch), Some(3));

        let mut ticks = 0;
        while let Some(SessionEvent::Game(GameEvent::TimerTick { epoch: 3 })) = rx.recv().await {
            ticks += 1;
            if ticks == 7 {
                break;
            }
        }
        assert_eq!(ticks, 7);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn timer_started_during_a_clip_waits_for_it() {
        let (mut rt, mut rx, _frames_rx) = runtime();
        let (player, _clips) = sleeping_player();
        rt.player = player;
        rt.perform(vec![Effect::PlayClip("dog".into())], 20).await;
        rt.perform(vec![Effect::StartTimer { epoch: 4, seconds: 20 }], 20).await;
        assert!(rt.timer.is_none());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());

        rt.perform(vec![Effect::StopTimer, Effect::CancelClip], 20).await;
        assert!(rt.paused.is_none());
        assert!(rt.timer.is_none());
        assert!(rt.clip.is_none());
    }
}

//! Welcome / Learning / Game mode machine.
//!
//! `GameMachine::apply` consumes one event and returns the side effects the
//! session runtime has to perform. The machine itself never sleeps, spawns
//! or plays anything.

use mirror_proto::notification::{Notification, NotificationKind};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::clips::ClipPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    #[serde(default = "default_round_seconds")]
    pub round_seconds: u32,
    /// Pause between a correct answer and the next target.
    #[serde(default = "default_advance_delay_ms")]
    pub advance_delay_ms: u64,
    /// Fixed RNG seed for target selection (tests, demos).
    pub seed: Option<u64>,
}

fn default_round_seconds() -> u32 { 20 }
fn default_advance_delay_ms() -> u64 { 2000 }

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            round_seconds: default_round_seconds(),
            advance_delay_ms: default_advance_delay_ms(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Welcome,
    Learning,
    Game,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Welcome => "Welcome",
            Mode::Learning => "Learning",
            Mode::Game => "Game",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSession {
    pub mode: Mode,
    /// Insertion-ordered, no duplicates.
    pub learned_objects: Vec<String>,
    pub current_target: Option<String>,
    pub previous_target: Option<String>,
    pub score: u32,
    pub timer_seconds_remaining: u32,
    pub detecting: bool,
}

impl GameSession {
    fn new(round_seconds: u32) -> Self {
        Self {
            mode: Mode::Welcome,
            learned_objects: Vec::new(),
            current_target: None,
            previous_target: None,
            score: 0,
            timer_seconds_remaining: round_seconds,
            detecting: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    SwitchToLearning,
    SwitchToGame,
    Skip,
    Quit,
    OpenCamera,
    /// Report mode, score, target and time left without changing anything.
    Status,
    Recognized(String),
    TimerTick { epoch: u64 },
    TimerExpired { epoch: u64 },
    AdvanceRound { epoch: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Notify(Notification),
    StartTimer { epoch: u64, seconds: u32 },
    StopTimer,
    ScheduleAdvance { epoch: u64, delay: Duration },
    PlayClip(String),
    CancelClip,
    SetDetecting(bool),
    StartCamera,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GameError {
    #[error("no objects learned yet")]
    NoLearnedObjects,
}

pub struct GameMachine {
    session: GameSession,
    cfg: GameConfig,
    clips: ClipPolicy,
    rng: StdRng,
    epoch: u64,
}

impl GameMachine {
    pub fn new(cfg: GameConfig, clips: ClipPolicy) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { session: GameSession::new(cfg.round_seconds), cfg, clips, rng, epoch: 0 }
    }

    pub fn session(&self) -> &GameSession { &self.session }

    /// Current timer generation; timer-derived events must carry it.
    pub fn epoch(&self) -> u64 { self.epoch }

    pub fn apply(&mut self, event: GameEvent) -> Vec<Effect> {
        let mut fx = Vec::new();
        match event {
            GameEvent::SwitchToLearning => {
                self.stop_timer(&mut fx);
                self.session.mode = Mode::Learning;
                self.set_detecting(true, &mut fx);
                fx.push(notify(
                    Notification::new(NotificationKind::ModeChanged, "Learning Mode Activated")
                        .with_detail("Show objects to learn."),
                ));
            }
            GameEvent::SwitchToGame => match self.ensure_learned() {
                Err(e) => {
                    debug!("game: refusing game mode: {}", e);
                    fx.push(notify(
                        Notification::new(NotificationKind::NothingLearned, "No Objects Learned")
                            .with_detail("Please learn objects first in Learning Mode."),
                    ));
                }
                Ok(()) => {
                    self.stop_timer(&mut fx);
                    self.session.mode = Mode::Game;
                    self.set_detecting(true, &mut fx);
                    fx.push(notify(Notification::new(NotificationKind::ModeChanged, "Game Mode Activated")));
                    self.pick_next_target(&mut fx);
                }
            },
            GameEvent::Recognized(name) => self.on_recognized(name, &mut fx),
            GameEvent::Skip => {
                if self.session.mode == Mode::Game {
                    let skipped = self.session.current_target.clone().unwrap_or_default();
                    fx.push(notify(
                        Notification::new(NotificationKind::Skipped, "Skipped!")
                            .with_detail(format!("You skipped: {}", skipped)),
                    ));
                    self.pick_next_target(&mut fx);
                }
            }
            GameEvent::Quit => {
                self.stop_timer(&mut fx);
                fx.push(Effect::CancelClip);
                self.set_detecting(false, &mut fx);
                let s = &mut self.session;
                s.learned_objects.clear();
                s.current_target = None;
                s.previous_target = None;
                s.timer_seconds_remaining = self.cfg.round_seconds;
                s.mode = Mode::Welcome;
                info!("game: session quit, score {}", s.score);
                fx.push(notify(Notification::new(NotificationKind::ModeChanged, "Session ended")));
            }
            GameEvent::OpenCamera => {
                self.stop_timer(&mut fx);
                self.session.mode = Mode::Welcome;
                fx.push(Effect::StartCamera);
            }
            GameEvent::Status => fx.push(notify(self.status())),
            GameEvent::TimerTick { epoch } => {
                if self.is_live(epoch) {
                    self.session.timer_seconds_remaining = self.session.timer_seconds_remaining.saturating_sub(1);
                    if self.session.timer_seconds_remaining == 0 {
                        self.time_up(&mut fx);
                    }
                }
            }
            GameEvent::TimerExpired { epoch } => {
                if self.is_live(epoch) {
                    self.session.timer_seconds_remaining = 0;
                    self.time_up(&mut fx);
                }
            }
            GameEvent::AdvanceRound { epoch } => {
                if self.is_live(epoch) {
                    self.pick_next_target(&mut fx);
                }
            }
        }
        fx
    }

    fn status(&self) -> Notification {
        let s = &self.session;
        let mut detail = format!("Mode: {}", s.mode.as_str());
        if s.mode == Mode::Game {
            if let Some(t) = &s.current_target {
                detail.push_str(&format!(", Find: {}, Time Left: {}s", t, s.timer_seconds_remaining));
            }
        }
        if !s.learned_objects.is_empty() {
            detail.push_str(&format!(", Learned: {}", s.learned_objects.join(", ")));
        }
        Notification::new(NotificationKind::Status, format!("Score: {}", s.score)).with_detail(detail)
    }

    fn ensure_learned(&self) -> Result<(), GameError> {
        if self.session.learned_objects.is_empty() {
            return Err(GameError::NoLearnedObjects);
        }
        Ok(())
    }

    fn on_recognized(&mut self, name: String, fx: &mut Vec<Effect>) {
        match self.session.mode {
            Mode::Welcome => debug!("game: ignoring {} in welcome", name),
            Mode::Learning => {
                if !self.session.learned_objects.contains(&name) {
                    info!("game: learned {}", name);
                    self.session.learned_objects.push(name.clone());
                    fx.push(notify(
                        Notification::new(NotificationKind::Learned, "Learned")
                            .with_detail(name.clone()),
                    ));
                }
                if self.clips.is_eligible(&name) {
                    fx.push(Effect::PlayClip(name));
                }
            }
            Mode::Game => {
                if self.session.current_target.as_deref() != Some(name.as_str()) {
                    debug!("game: {} is not the target {:?}", name, self.session.current_target);
                    return;
                }
                self.session.score += 1;
                self.session.previous_target = self.session.current_target.take();
                self.stop_timer(fx);
                info!("game: correct {} (score {})", name, self.session.score);
                fx.push(notify(
                    Notification::new(NotificationKind::Correct, "Correct!")
                        .with_detail(format!("You identified: {} (score {})", name, self.session.score)),
                ));
                fx.push(Effect::ScheduleAdvance {
                    epoch: self.epoch,
                    delay: Duration::from_millis(self.cfg.advance_delay_ms),
                });
            }
        }
    }

    fn time_up(&mut self, fx: &mut Vec<Effect>) {
        let missed = self.session.current_target.clone().unwrap_or_default();
        fx.push(notify(
            Notification::new(NotificationKind::TimeUp, "Time's up!")
                .with_detail(format!("The object was: {}", missed)),
        ));
        self.pick_next_target(fx);
    }

    fn pick_next_target(&mut self, fx: &mut Vec<Effect>) {
        let s = &self.session;
        let pool: Vec<&String> = s
            .learned_objects
            .iter()
            .filter(|o| Some(o.as_str()) != s.current_target.as_deref())
            .filter(|o| Some(o.as_str()) != s.previous_target.as_deref())
            .collect();

        let Some(next) = pool.choose(&mut self.rng).map(|n| n.to_string()) else {
            self.session.current_target = None;
            self.stop_timer(fx);
            debug!("game: no target available");
            fx.push(notify(
                Notification::new(NotificationKind::NoTargetAvailable, "No Object Available")
                    .with_detail("Learn more objects to keep playing."),
            ));
            return;
        };

        self.session.current_target = Some(next.clone());
        self.start_timer(fx);
        info!("game: new target {}", next);
        fx.push(notify(Notification::new(NotificationKind::FindTarget, format!("Find: {}", next))));
        if self.clips.is_eligible(&next) {
            fx.push(Effect::PlayClip(next));
        }
    }

    fn start_timer(&mut self, fx: &mut Vec<Effect>) {
        self.epoch += 1;
        self.session.timer_seconds_remaining = self.cfg.round_seconds;
        fx.push(Effect::StartTimer { epoch: self.epoch, seconds: self.cfg.round_seconds });
    }

    fn stop_timer(&mut self, fx: &mut Vec<Effect>) {
        self.epoch += 1;
        fx.push(Effect::StopTimer);
    }

    fn set_detecting(&mut self, on: bool, fx: &mut Vec<Effect>) {
        self.session.detecting = on;
        fx.push(Effect::SetDetecting(on));
    }

    fn is_live(&self, epoch: u64) -> bool {
        if self.session.mode != Mode::Game || epoch != self.epoch {
            debug!("game: dropping stale timer event (epoch {} vs {})", epoch, self.epoch);
            return false;
        }
        true
    }
}

fn notify(n: Notification) -> Effect {
    Effect::Notify(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(clips: &[&str]) -> GameMachine {
        let clips: Vec<String> = clips.iter().map(|s| s.to_string()).collect();
        GameMachine::new(
            GameConfig { seed: Some(7), ..Default::default() },
            ClipPolicy::new(&clips, &[]),
        )
    }

    fn learn(m: &mut GameMachine, names: &[&str]) {
        m.apply(GameEvent::SwitchToLearning);
        for n in names {
            m.apply(GameEvent::Recognized(n.to_string()));
        }
    }

    fn kinds(fx: &[Effect]) -> Vec<NotificationKind> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Notify(n) => Some(n.kind),
                _ => None,
            })
            .collect()
    }

    fn started_epoch(fx: &[Effect]) -> Option<u64> {
        fx.iter().find_map(|e| match e {
            Effect::StartTimer { epoch, .. } => Some(*epoch),
            _ => None,
        })
    }

    #[test]
    fn starts_in_welcome() {
        let m = machine(&[]);
        let s = m.session();
        assert_eq!(s.mode, Mode::Welcome);
        assert!(s.learned_objects.is_empty());
        assert_eq!(s.score, 0);
        assert_eq!(s.timer_seconds_remaining, 20);
        assert!(!s.detecting);
    }

    #[test]
    fn learning_appends_once() {
        let mut m = machine(&[]);
        learn(&mut m, &["cat", "dog", "cat"]);
        assert_eq!(m.session().learned_objects, vec!["cat", "dog"]);
        let fx = m.apply(GameEvent::Recognized("dog".into()));
        assert!(kinds(&fx).is_empty());
    }

    #[test]
    fn learning_plays_clip_for_eligible_classes_every_time() {
        let mut m = machine(&["dog"]);
        m.apply(GameEvent::SwitchToLearning);
        let first = m.apply(GameEvent::Recognized("dog".into()));
        assert!(first.contains(&Effect::PlayClip("dog".into())));
        let again = m.apply(GameEvent::Recognized("dog".into()));
        assert_eq!(again, vec![Effect::PlayClip("dog".into())]);
        let cat = m.apply(GameEvent::Recognized("cat".into()));
        assert!(!cat.iter().any(|e| matches!(e, Effect::PlayClip(_))));
    }

    #[test]
    fn game_needs_learned_objects() {
        let mut m = machine(&[]);
        let fx = m.apply(GameEvent::SwitchToGame);
        assert_eq!(kinds(&fx), vec![NotificationKind::NothingLearned]);
        assert_eq!(m.session().mode, Mode::Welcome);
    }

    #[test]
    fn welcome_ignores_recognitions() {
        let mut m = machine(&[]);
        let fx = m.apply(GameEvent::Recognized("cat".into()));
        assert!(fx.is_empty());
        assert!(m.session().learned_objects.is_empty());
    }

    #[test]
    fn wrong_object_changes_nothing() {
        let mut m = machine(&[]);
        learn(&mut m, &["cat"]);
        m.apply(GameEvent::SwitchToGame);
        let before = m.session().clone();
        let fx = m.apply(GameEvent::Recognized("dog".into()));
        assert!(fx.is_empty());
        assert_eq!(m.session(), &before);
    }

    #[test]
    fn ticks_count_down_and_expire() {
        let mut m = machine(&[]);
        learn(&mut m, &["cat"]);
        let fx = m.apply(GameEvent::SwitchToGame);
        let epoch = started_epoch(&fx).unwrap();

        for _ in 0..19 {
            assert!(m.apply(GameEvent::TimerTick { epoch }).is_empty());
        }
        assert_eq!(m.session().timer_seconds_remaining, 1);
        let fx = m.apply(GameEvent::TimerTick { epoch });
        assert_eq!(kinds(&fx), vec![NotificationKind::TimeUp, NotificationKind::NoTargetAvailable]);
        assert_eq!(m.session().current_target, None);
        assert_eq!(m.session().score, 0);
    }

    #[test]
    fn skip_picks_another_target() {
        let mut m = machine(&[]);
        learn(&mut m, &["cat", "dog"]);
        m.apply(GameEvent::SwitchToGame);
        let first = m.session().current_target.clone().unwrap();
        let fx = m.apply(GameEvent::Skip);
        assert_eq!(kinds(&fx)[0], NotificationKind::Skipped);
        let second = m.session().current_target.clone().unwrap();
        assert_ne!(first, second);
        assert_eq!(m.session().score, 0);
    }

    #[test]
    fn skip_outside_game_is_ignored() {
        let mut m = machine(&[]);
        learn(&mut m, &["cat"]);
        assert!(m.apply(GameEvent::Skip).is_empty());
    }

    #[test]
    fn stale_ticks_are_dropped() {
        let mut m = machine(&[]);
        learn(&mut m, &["cat", "dog"]);
        let fx = m.apply(GameEvent::SwitchToGame);
        let old = started_epoch(&fx).unwrap();
        m.apply(GameEvent::Skip);
        m.apply(GameEvent::TimerTick { epoch: old });
        assert_eq!(m.session().timer_seconds_remaining, 20);
        assert!(m.apply(GameEvent::TimerExpired { epoch: old }).is_empty());
    }

    #[test]
    fn open_camera_returns_to_welcome() {
        let mut m = machine(&[]);
        learn(&mut m, &["cat"]);
        let fx = m.apply(GameEvent::OpenCamera);
        assert!(fx.contains(&Effect::StartCamera));
        assert_eq!(m.session().mode, Mode::Welcome);
        assert_eq!(m.session().learned_objects, vec!["cat"]);
    }

    #[test]
    fn correct_reports_running_score() {
        let mut m = machine(&[]);
        learn(&mut m, &["cat"]);
        m.apply(GameEvent::SwitchToGame);
        let fx = m.apply(GameEvent::Recognized("cat".into()));
        let detail = fx.iter().find_map(|e| match e {
            Effect::Notify(n) if n.kind == NotificationKind::Correct => n.detail.clone(),
            _ => None,
        });
        assert_eq!(detail.as_deref(), Some("You identified: cat (score 1)"));
    }

    #[test]
    fn status_reports_without_side_effects() {
        let mut m = machine(&[]);
        learn(&mut m, &["cat", "dog"]);
        let fx = m.apply(GameEvent::SwitchToGame);
        let epoch = started_epoch(&fx).unwrap();
        m.apply(GameEvent::TimerTick { epoch });
        let target = m.session().current_target.clone().unwrap();
        let before = m.session().clone();

        let fx = m.apply(GameEvent::Status);
        assert_eq!(m.session(), &before);
        match fx.as_slice() {
            [Effect::Notify(n)] => {
                assert_eq!(n.kind, NotificationKind::Status);
                assert_eq!(n.title, "Score: 0");
                assert_eq!(
                    n.detail.as_deref(),
                    Some(format!("Mode: Game, Find: {}, Time Left: 19s, Learned: cat, dog", target).as_str())
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn no_learned_objects_error_message() {
        assert_eq!(GameError::NoLearnedObjects.to_string(), "no objects learned yet");
    }
}

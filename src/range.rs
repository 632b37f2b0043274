//! Frame windows, given as `"<start>-<stop>[:<step>]"`, e.g. `"2001-4001:1"` or `"1-last:10"`.
//! An optional `"NAME|"` prefix names the trajectory the window applies to.
//!
//! Frame numbers are 1-based and inclusive at both ends.

use std::{fmt, path::Path, str::FromStr, sync::LazyLock};

use regex::Regex;

use crate::{PmapError, Result};

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([^|]+)\|)?(\d+)-(\d+|last)(?::(\d+))?$").expect("valid frame range regex")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStop {
    Frame(usize),
    /// Run to the end of the trajectory.
    Last,
}

/// A validated window. Build with [`FrameRange::new`] or by parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRange {
    target: Option<String>,
    start: usize,
    stop: FrameStop,
    step: usize,
}

impl Default for FrameRange {
    /// Every frame.
    fn default() -> Self {
        Self {
            target: None,
            start: 1,
            stop: FrameStop::Last,
            step: 1,
        }
    }
}

impl FrameRange {
    pub fn new(target: Option<String>, start: usize, stop: FrameStop, step: usize) -> Result<Self> {
        if target.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(PmapError::value("Frame range target name must not be empty"));
        }
        if start == 0 {
            return Err(PmapError::value(format!(
                "Frame numbers start at 1; got start {start}"
            )));
        }
        if step == 0 {
            return Err(PmapError::value("Frame step must be positive"));
        }
        if let FrameStop::Frame(stop) = stop {
            if stop < start {
                return Err(PmapError::value(format!(
                    "Frame range stop {stop} precedes start {start}"
                )));
            }
        }

        Ok(Self {
            target,
            start,
            stop,
            step,
        })
    }

    /// The trajectory this window is restricted to, if any.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn stop(&self) -> FrameStop {
        self.stop
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Whether the window applies to the trajectory called `name`. Untargeted windows apply to
    /// every trajectory.
    pub fn applies_to(&self, name: &str) -> bool {
        self.target.as_deref().is_none_or(|t| t == name)
    }

    /// This window for a trajectory called `name`, or every frame if it targets another one.
    pub fn for_trajectory(&self, name: &str) -> Self {
        if self.applies_to(name) {
            self.clone()
        } else {
            Self::default()
        }
    }

    /// Yield only the items of `frames` within this window.
    pub fn apply<I: Iterator>(&self, frames: I) -> impl Iterator<Item = I::Item> + use<I> {
        let take = match self.stop {
            FrameStop::Frame(stop) => stop + 1 - self.start,
            FrameStop::Last => usize::MAX,
        };

        frames.skip(self.start - 1).take(take).step_by(self.step)
    }
}

impl FromStr for FrameRange {
    type Err = PmapError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = RANGE_RE.captures(s.trim()).ok_or_else(|| {
            PmapError::value(format!(
                "Invalid frame range \"{s}\"; expected <start>-<stop>[:<step>], e.g. 1-100:2"
            ))
        })?;

        let number = |i: usize| -> Result<usize> {
            caps[i]
                .parse::<usize>()
                .map_err(|_| PmapError::value(format!("Frame number out of range in \"{s}\"")))
        };

        let target = caps.get(1).map(|m| m.as_str().to_owned());
        let start = number(2)?;
        let stop = match &caps[3] {
            "last" => FrameStop::Last,
            _ => FrameStop::Frame(number(3)?),
        };
        let step = match caps.get(4) {
            Some(_) => number(4)?,
            None => 1,
        };

        Self::new(target, start, stop, step)
            .map_err(|e| PmapError::value(format!("Invalid frame range \"{s}\": {e}")))
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(t) = &self.target {
            write!(f, "{t}|")?;
        }
        write!(f, "{}-", self.start)?;
        match self.stop {
            FrameStop::Frame(s) => write!(f, "{s}")?,
            FrameStop::Last => write!(f, "last")?,
        }
        write!(f, ":{}", self.step)
    }
}

/// The name a `NAME|` window matches a trajectory file by: its file stem, e.g. `prod2` for
/// `runs/prod2.dcd`.
pub fn trajectory_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parse a snapshot window setting. Equivalent to `s.parse::<FrameRange>()`.
pub fn parse_snapshot_setting(s: &str) -> Result<FrameRange> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_step() {
        let r = parse_snapshot_setting("1-100:2").unwrap();
        assert_eq!(r.start, 1);
        assert_eq!(r.stop, FrameStop::Frame(100));
        assert_eq!(r.step, 2);
        assert_eq!(r.target, None);
    }

    #[test]
    fn test_parse_default_step() {
        let r = parse_snapshot_setting("1-1").unwrap();
        assert_eq!((r.start, r.stop, r.step), (1, FrameStop::Frame(1), 1));
    }

    #[test]
    fn test_parse_last_and_target() {
        let r = parse_snapshot_setting("prod2|2001-last:5").unwrap();
        assert_eq!(r.target.as_deref(), Some("prod2"));
        assert_eq!(r.start, 2001);
        assert_eq!(r.stop, FrameStop::Last);
        assert_eq!(r.step, 5);
        assert_eq!(r.to_string(), "prod2|2001-last:5");
    }

    #[test]
    fn test_parse_invalid() {
        for s in [
            "invalid", "", "1", "1-", "-5", "1-10:", "1-10:2:3", "a-b", "0-10", "5-1", "1-10:0",
            "|1-10",
        ] {
            let err = parse_snapshot_setting(s).unwrap_err();
            assert!(err.is_value_error(), "{s}");
        }
    }

    #[test]
    fn test_apply_window() {
        let r = parse_snapshot_setting("2-9:3").unwrap();
        let picked: Vec<usize> = r.apply(1..=20).collect();
        assert_eq!(picked, vec![2, 5, 8]);

        let all: Vec<usize> = FrameRange::default().apply(1..=4).collect();
        assert_eq!(all, vec![1, 2, 3, 4]);

        let to_end: Vec<usize> = parse_snapshot_setting("3-last:2").unwrap().apply(1..=8).collect();
        assert_eq!(to_end, vec![3, 5, 7]);
    }

    #[test]
    fn test_new_validates() {
        assert!(FrameRange::new(None, 0, FrameStop::Last, 1).unwrap_err().is_value_error());
        assert!(FrameRange::new(None, 1, FrameStop::Last, 0).is_err());
        assert!(FrameRange::new(None, 5, FrameStop::Frame(4), 1).is_err());
        assert!(FrameRange::new(Some(" ".to_owned()), 1, FrameStop::Last, 1).is_err());

        let r = FrameRange::new(Some("b".to_owned()), 2, FrameStop::Frame(3), 1).unwrap();
        assert_eq!(r.apply(1..=5).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(r, parse_snapshot_setting("b|2-3").unwrap());
    }

    #[test]
    fn test_targeted_window() {
        let r = parse_snapshot_setting("b|1-1").unwrap();
        assert_eq!(r.target(), Some("b"));
        assert!(r.applies_to("b"));
        assert!(!r.applies_to("a"));

        let on_b: Vec<usize> = r.for_trajectory("b").apply(1..=5).collect();
        let on_a: Vec<usize> = r.for_trajectory("a").apply(1..=5).collect();
        assert_eq!(on_b, vec![1]);
        assert_eq!(on_a, vec![1, 2, 3, 4, 5]);

        let untargeted = parse_snapshot_setting("2-3").unwrap();
        assert!(untargeted.applies_to("anything"));
    }
}

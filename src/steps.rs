//! Step Gate
//!
//! A session's workflow runs through a fixed sequence of steps `1..=TOTAL_STEPS`.
//! Step `k` may be resumed only once every earlier step is recorded complete.

use serde::Serialize;
use thiserror::Error;

use crate::session::StepSet;

pub const TOTAL_STEPS: u8 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepRejection {
    #[error("No session selected")]
    NoSession,
    #[error("Step {0} does not exist (valid steps are 1 to {max})", max = TOTAL_STEPS)]
    OutOfRange(u8),
    #[error("Step {step} is locked until step {missing} is completed")]
    Locked { step: u8, missing: u8 },
}

impl Serialize for StepRejection {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// First missing prerequisite for `step`, if any.
fn missing_prerequisite(step: u8, completed: &StepSet) -> Option<u8> {
    (1..step).find(|k| !completed.contains(k))
}

/// Step 1 is always resumable; step k is resumable iff 1..k-1 are complete.
pub fn can_resume(step: u8, completed: &StepSet) -> bool {
    (1..=TOTAL_STEPS).contains(&step) && missing_prerequisite(step, completed).is_none()
}

/// Resumability of every step, in order.
pub fn resume_map(completed: &StepSet) -> [bool; TOTAL_STEPS as usize] {
    let mut map = [false; TOTAL_STEPS as usize];
    for (i, slot) in map.iter_mut().enumerate() {
        *slot = can_resume(i as u8 + 1, completed);
    }
    map
}

/// Check a step selection for the (optional) selected session's completed steps.
pub fn check_selection(step: u8, completed: Option<&StepSet>) -> Result<u8, StepRejection> {
    let completed = completed.ok_or(StepRejection::NoSession)?;
    if !(1..=TOTAL_STEPS).contains(&step) {
        return Err(StepRejection::OutOfRange(step));
    }
    match missing_prerequisite(step, completed) {
        Some(missing) => Err(StepRejection::Locked { step, missing }),
        None => Ok(step),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(steps: &[u8]) -> StepSet {
        steps.iter().copied().collect()
    }

    #[test]
    fn test_can_resume_table() {
        assert!(can_resume(1, &set(&[])));
        assert!(can_resume(1, &set(&[2, 3])));
        assert!(can_resume(2, &set(&[1])));
        assert!(!can_resume(2, &set(&[])));
        assert!(can_resume(3, &set(&[1, 2])));
        assert!(!can_resume(3, &set(&[1])));
        assert!(!can_resume(3, &set(&[2])));
    }

    #[test]
    fn test_out_of_range_steps() {
        assert!(!can_resume(0, &set(&[1, 2, 3])));
        assert!(!can_resume(4, &set(&[1, 2, 3])));
    }

    #[test]
    fn test_resume_map() {
        assert_eq!(resume_map(&set(&[])), [true, false, false]);
        assert_eq!(resume_map(&set(&[1])), [true, true, false]);
        assert_eq!(resume_map(&set(&[1, 2])), [true, true, true]);
    }

    #[test]
    fn test_check_selection() {
        assert_eq!(check_selection(2, None), Err(StepRejection::NoSession));
        assert_eq!(check_selection(2, Some(&set(&[1]))), Ok(2));
        assert_eq!(
            check_selection(3, Some(&set(&[1]))),
            Err(StepRejection::Locked { step: 3, missing: 2 })
        );
        assert_eq!(
            check_selection(7, Some(&set(&[1, 2, 3]))),
            Err(StepRejection::OutOfRange(7))
        );
    }
}

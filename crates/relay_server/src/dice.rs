//! Server-side dice rolling.
//!
//! Rolls are made by the server so clients cannot report their own results. Only
//! single-die notation (`d20`) is supported.

use crate::error::DiceError;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Result of one roll, before it is attributed to a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollOutcome {
    pub sides: u32,
    pub roll: u32,
    pub modifier: i32,
    pub total: i64,
}

/// Parses `d<N>` into the side count `N`.
pub fn parse_sides(dice_type: &str) -> Result<u32, DiceError> {
    let invalid = || DiceError::InvalidDiceSpec(dice_type.to_string());
    let notation = dice_type.trim();
    let digits = notation
        .strip_prefix('d')
        .or_else(|| notation.strip_prefix('D'))
        .ok_or_else(invalid)?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match digits.parse::<u32>() {
        Ok(sides) if sides >= 1 => Ok(sides),
        _ => Err(invalid()),
    }
}

/// Uniform single-die roller shared by every connection.
#[derive(Debug)]
pub struct DiceEngine {
    rng: Mutex<StdRng>,
}

impl DiceEngine {
    /// Engine seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic engine; two engines with the same seed produce the same rolls.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn new(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }

    /// Rolls one die described by `dice_type` and applies `modifier`.
    pub fn roll(&self, dice_type: &str, modifier: i32) -> Result<RollOutcome, DiceError> {
        let sides = parse_sides(dice_type)?;
        let roll = self.rng.lock().gen_range(1..=sides);
        Ok(RollOutcome {
            sides,
            roll,
            modifier,
            total: i64::from(roll) + i64::from(modifier),
        })
    }
}

impl Default for DiceEngine {
    fn default() -> Self {
        Self::from_entropy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sides() {
        assert_eq!(parse_sides("d20"), Ok(20));
        assert_eq!(parse_sides("D6"), Ok(6));
        assert_eq!(parse_sides(" d100 "), Ok(100));
        assert_eq!(parse_sides("d1"), Ok(1));
    }

    #[test]
    fn test_invalid_notation() {
        for notation in ["dx", "d0", "", "d", "2d6", "20", "d-4", "d+4", "d4.5", "d99999999999"] {
            assert_eq!(
                parse_sides(notation),
                Err(DiceError::InvalidDiceSpec(notation.to_string())),
                "`{notation}` should be rejected"
            );
        }
    }

    #[test]
    fn test_roll_within_bounds() {
        let engine = DiceEngine::from_entropy();
        for sides in [1u32, 2, 4, 6, 8, 10, 12, 20, 100] {
            let notation = format!("d{sides}");
            for modifier in [-10, -1, 0, 3, 1000] {
                let outcome = engine.roll(&notation, modifier).unwrap();
                assert!(outcome.roll >= 1 && outcome.roll <= sides);
                assert_eq!(outcome.total, i64::from(outcome.roll) + i64::from(modifier));
                assert_eq!(outcome.sides, sides);
            }
        }
    }

    #[test]
    fn test_extreme_modifiers_do_not_overflow() {
        let engine = DiceEngine::seeded(1);
        let low = engine.roll("d6", i32::MIN).unwrap();
        assert_eq!(low.total, i64::from(low.roll) + i64::from(i32::MIN));
        let high = engine.roll(&format!("d{}", u32::MAX), i32::MAX).unwrap();
        assert!(high.total > i64::from(i32::MAX));
    }

    #[test]
    fn test_seeded_engines_agree() {
        let a = DiceEngine::seeded(7);
        let b = DiceEngine::seeded(7);
        for _ in 0..20 {
            assert_eq!(a.roll("d20", 0).unwrap(), b.roll("d20", 0).unwrap());
        }
    }

    #[test]
    fn test_every_face_reachable() {
        let engine = DiceEngine::seeded(99);
        let mut seen = [false; 6];
        for _ in 0..600 {
            let outcome = engine.roll("d6", 0).unwrap();
            seen[(outcome.roll - 1) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}

//! Transaction sequence numbers

/// Step between consecutive sequence numbers
const SEQUENCE_STEP: u8 = 8;

/// Cycling, never-zero transaction tag
///
/// Starts at 0 and advances by 8 modulo 256, skipping 0, so the period is 31.
#[derive(Debug, Default, Clone)]
pub struct SequenceCounter {
    current: u8,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the next tag
    pub fn next(&mut self) -> u8 {
        self.current = self.current.wrapping_add(SEQUENCE_STEP);
        if self.current == 0 {
            self.current = SEQUENCE_STEP;
        }
        self.current
    }

    /// Last tag handed out (0 before the first call)
    pub fn current(&self) -> u8 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_first_values() {
        let mut seq = SequenceCounter::new();
        assert_eq!(seq.current(), 0);
        assert_eq!(seq.next(), 0x08);
        assert_eq!(seq.next(), 0x10);
        assert_eq!(seq.current(), 0x10);
    }

    #[test]
    fn test_wraps_past_zero() {
        let mut seq = SequenceCounter { current: 0xF0 };
        assert_eq!(seq.next(), 0xF8);
        assert_eq!(seq.next(), 0x08);
    }

    #[test]
    fn test_period_never_zero() {
        let mut seq = SequenceCounter::new();
        let first_cycle: Vec<u8> = (0..31).map(|_| seq.next()).collect();

        assert!(first_cycle.iter().all(|&v| v != 0));
        let distinct: HashSet<u8> = first_cycle.iter().copied().collect();
        assert_eq!(distinct.len(), first_cycle.len());

        // 0 is skipped, so the cycle repeats after 31 non-zero multiples of 8
        assert_eq!(seq.next(), first_cycle[0]);
    }

    #[test]
    fn test_32_calls_never_yield_zero() {
        let mut seq = SequenceCounter::new();
        for _ in 0..32 * 4 {
            assert_ne!(seq.next(), 0);
        }
    }
}

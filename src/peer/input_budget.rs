/// How much remote-typed text the local side still accepts under the current grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputBudget {
    capacity: usize,
    remaining: usize,
}

impl InputBudget {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            remaining: capacity,
        }
    }

    pub fn reset(&mut self) {
        self.remaining = self.capacity;
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Takes up to `wanted` units and returns how many were granted.
    pub fn consume(&mut self, wanted: usize) -> usize {
        let granted = wanted.min(self.remaining);
        self.remaining -= granted;
        granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_is_clipped_and_never_underflows() {
        let mut b = InputBudget::new(10);
        assert_eq!(b.consume(4), 4);
        assert_eq!(b.remaining(), 6);
        assert_eq!(b.consume(32), 6);
        assert!(b.is_exhausted());
        assert_eq!(b.consume(1), 0);
        assert_eq!(b.remaining(), 0);
    }

    #[test]
    fn reset_restores_capacity() {
        let mut b = InputBudget::new(5);
        b.consume(5);
        b.reset();
        assert_eq!(b.remaining(), b.capacity());
    }
}

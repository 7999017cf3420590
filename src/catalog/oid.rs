pub type Oid = u32;

pub const INVALID_OID: Oid = 0;

/// Objects created after bootstrap get OIDs from here up.
pub const FIRST_NORMAL_OID: Oid = 16_384;

/// Bootstrap rows that have no fixed OID are numbered from here.
pub const FIRST_BOOTSTRAP_OBJECT_ID: Oid = 10_000;

#[derive(Debug, Clone)]
pub struct OidGenerator {
    next: Oid,
}

impl Default for OidGenerator {
    fn default() -> Self {
        Self::new(FIRST_NORMAL_OID)
    }
}

impl OidGenerator {
    pub const fn new(start: Oid) -> Self {
        Self { next: start }
    }

    /// Hand out the next OID. On wraparound the counter restarts at
    /// [`FIRST_NORMAL_OID`], as the real counter does.
    pub fn next_oid(&mut self) -> Oid {
        let oid = self.next;
        self.next = match self.next.checked_add(1) {
            Some(next) => next,
            None => FIRST_NORMAL_OID,
        };
        oid
    }

    pub fn peek(&self) -> Oid {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_to_first_normal_oid() {
        let mut generator = OidGenerator::new(Oid::MAX);
        assert_eq!(generator.next_oid(), Oid::MAX);
        assert_eq!(generator.next_oid(), FIRST_NORMAL_OID);
    }
}

//! The four-stratum classification of compiled expressions.

/// Compile-time classification of an expression by evaluation model.
///
/// Strata are totally ordered; a composite expression sits at the maximum
/// stratum of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stratum {
    /// Fully reduced at compile time.
    Value = 1,
    /// Pure, reads nothing from the subscription.
    PureNonSubscription = 2,
    /// Pure, reads at least one subscription field.
    PureSubscription = 3,
    /// Driven by at least one attribute stream.
    Stream = 4,
}

impl Stratum {
    /// The stratum of a composite over two inputs.
    pub fn join(self, other: Stratum) -> Stratum {
        self.max(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_takes_the_maximum() {
        assert_eq!(Stratum::Value.join(Stratum::Value), Stratum::Value);
        assert_eq!(
            Stratum::Value.join(Stratum::PureSubscription),
            Stratum::PureSubscription
        );
        assert_eq!(
            Stratum::PureNonSubscription.join(Stratum::Stream),
            Stratum::Stream
        );
    }

    #[test]
    fn ordering_matches_the_taxonomy() {
        assert!(Stratum::Value < Stratum::PureNonSubscription);
        assert!(Stratum::PureNonSubscription < Stratum::PureSubscription);
        assert!(Stratum::PureSubscription < Stratum::Stream);
    }
}

//! Network-quality gating for prefetch.
//!
//! Prefetching is advisory; on metered or very slow connections it is pure
//! waste. The [`NetworkInfo`] trait mirrors what a browser's
//! `navigator.connection` reports: a save-data flag plus an effective
//! connection class. Hosts without that information use [`UnknownNetwork`],
//! which never blocks prefetch.

/// Effective connection class, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveType {
    Slow2g,
    TwoG,
    ThreeG,
    FourG,
    Unknown,
}

impl EffectiveType {
    /// Whether this is a 2G-class connection (the `/2g/` test of the
    /// original heuristic, matching both `2g` and `slow-2g`).
    pub fn is_2g_class(&self) -> bool {
        matches!(self, EffectiveType::Slow2g | EffectiveType::TwoG)
    }
}

/// Host-reported connection quality.
pub trait NetworkInfo: Send + Sync {
    /// Whether the user has requested reduced data usage.
    fn save_data(&self) -> bool;

    /// The effective connection class.
    fn effective_type(&self) -> EffectiveType;

    /// Whether prefetching should be skipped entirely on this connection.
    fn should_skip_prefetch(&self) -> bool {
        self.save_data() || self.effective_type().is_2g_class()
    }
}

/// No connection information available: never constrains prefetch.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownNetwork;

impl NetworkInfo for UnknownNetwork {
    fn save_data(&self) -> bool {
        false
    }

    fn effective_type(&self) -> EffectiveType {
        EffectiveType::Unknown
    }
}

/// Fixed connection report, for hosts that know and for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticNetworkInfo {
    pub save_data: bool,
    pub effective_type: EffectiveType,
}

impl NetworkInfo for StaticNetworkInfo {
    fn save_data(&self) -> bool {
        self.save_data
    }

    fn effective_type(&self) -> EffectiveType {
        self.effective_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_g_classes_skip_prefetch() {
        let slow = StaticNetworkInfo {
            save_data: false,
            effective_type: EffectiveType::Slow2g,
        };
        assert!(slow.should_skip_prefetch());

        let two_g = StaticNetworkInfo {
            save_data: false,
            effective_type: EffectiveType::TwoG,
        };
        assert!(two_g.should_skip_prefetch());
    }

    #[test]
    fn save_data_skips_prefetch_on_any_connection() {
        let info = StaticNetworkInfo {
            save_data: true,
            effective_type: EffectiveType::FourG,
        };
        assert!(info.should_skip_prefetch());
    }

    #[test]
    fn unknown_network_never_constrains() {
        assert!(!UnknownNetwork.should_skip_prefetch());
    }
}

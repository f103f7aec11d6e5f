use std::cmp::Ordering;
use std::collections::HashSet;

use crate::market::{Offer, ProviderId};

/// Expected usage, in seconds, used to weigh per-second prices against the
/// fixed price when ranking offers.
pub const EXPECTED_USAGE_SECS: f64 = 60.0;

/// Price caps in currency per second (the fixed price is compared as is).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriceLimits {
    pub fixed: f64,
    pub cpu_per_sec: f64,
    pub duration_per_sec: f64,
}

/// Providers excluded from new work for the rest of the job.
///
/// Append-only: there is no way to remove an entry.
#[derive(Debug, Default)]
pub struct Blacklist {
    providers: HashSet<ProviderId>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider. Returns `false` if it was already excluded.
    pub fn insert(&mut self, provider: ProviderId) -> bool {
        self.providers.insert(provider)
    }

    pub fn contains(&self, provider: &ProviderId) -> bool {
        self.providers.contains(provider)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Excluded providers, sorted.
    pub fn providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<ProviderId> = self.providers.iter().cloned().collect();
        providers.sort();
        providers
    }
}

/// Price-bounded offer ranking combined with the blacklist.
///
/// Nothing is cached: every call re-reads the blacklist it is given, so a
/// provider excluded a moment ago is never picked.
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    limits: PriceLimits,
    expected_usage_secs: f64,
}

impl SelectionPolicy {
    pub fn new(limits: PriceLimits) -> Self {
        Self {
            limits,
            expected_usage_secs: EXPECTED_USAGE_SECS,
        }
    }

    pub fn limits(&self) -> &PriceLimits {
        &self.limits
    }

    /// Every price dimension is within its cap.
    pub fn within_caps(&self, offer: &Offer) -> bool {
        let p = &offer.pricing;
        p.fixed <= self.limits.fixed
            && p.cpu_per_sec <= self.limits.cpu_per_sec
            && p.duration_per_sec <= self.limits.duration_per_sec
    }

    /// Linear pay-per-use score, lower is cheaper. `None` if over any cap.
    pub fn score(&self, offer: &Offer) -> Option<f64> {
        if !self.within_caps(offer) {
            return None;
        }
        let p = &offer.pricing;
        Some(p.fixed + (p.cpu_per_sec + p.duration_per_sec) * self.expected_usage_secs)
    }

    pub fn is_eligible(&self, offer: &Offer, blacklist: &Blacklist) -> bool {
        !blacklist.contains(&offer.provider_id) && self.within_caps(offer)
    }

    /// Eligible offers, cheapest first. Ties keep the marketplace's order.
    /// Providers in `busy` already hold an activity and are skipped.
    pub fn rank<'a>(
        &self,
        offers: &'a [Offer],
        blacklist: &Blacklist,
        busy: &HashSet<ProviderId>,
    ) -> Vec<&'a Offer> {
        let mut ranked: Vec<(f64, &Offer)> = offers
            .iter()
            .filter(|offer| !busy.contains(&offer.provider_id))
            .filter(|offer| !blacklist.contains(&offer.provider_id))
            .filter_map(|offer| self.score(offer).map(|score| (score, offer)))
            .collect();
        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        ranked.into_iter().map(|(_, offer)| offer).collect()
    }

    /// The cheapest eligible offer, if any.
    pub fn select<'a>(
        &self,
        offers: &'a [Offer],
        blacklist: &Blacklist,
        busy: &HashSet<ProviderId>,
    ) -> Option<&'a Offer> {
        self.rank(offers, blacklist, busy).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Pricing;

    fn offer(id: &str, fixed: f64, cpu: f64, duration: f64) -> Offer {
        Offer {
            provider_id: ProviderId::new(id),
            provider_name: String::new(),
            pricing: Pricing {
                fixed,
                cpu_per_sec: cpu,
                duration_per_sec: duration,
            },
        }
    }

    fn policy() -> SelectionPolicy {
        SelectionPolicy::new(PriceLimits {
            fixed: 1.0,
            cpu_per_sec: 0.01,
            duration_per_sec: 0.01,
        })
    }

    #[test]
    fn over_any_cap_is_ineligible() {
        let policy = policy();
        let blacklist = Blacklist::new();
        assert!(policy.is_eligible(&offer("ok", 1.0, 0.01, 0.01), &blacklist));
        assert!(!policy.is_eligible(&offer("fixed", 1.5, 0.0, 0.0), &blacklist));
        assert!(!policy.is_eligible(&offer("cpu", 0.0, 0.02, 0.0), &blacklist));
        assert!(!policy.is_eligible(&offer("dur", 0.0, 0.0, 0.02), &blacklist));
    }

    #[test]
    fn blacklisted_provider_is_ineligible() {
        let policy = policy();
        let mut blacklist = Blacklist::new();
        let cheap = offer("p1", 0.0, 0.0, 0.0);
        assert!(policy.is_eligible(&cheap, &blacklist));
        blacklist.insert(ProviderId::new("p1"));
        assert!(!policy.is_eligible(&cheap, &blacklist));
    }

    #[test]
    fn rank_prefers_cheapest_linear_score() {
        let offers = vec![
            offer("pricey-cpu", 0.0, 0.01, 0.0),
            offer("fixed-only", 0.2, 0.0, 0.0),
            offer("free", 0.0, 0.0, 0.0),
        ];
        let ranked = policy().rank(&offers, &Blacklist::new(), &HashSet::new());
        let ids: Vec<&str> = ranked.iter().map(|o| o.provider_id.as_str()).collect();
        assert_eq!(ids, vec!["free", "fixed-only", "pricey-cpu"]);
    }

    #[test]
    fn ties_keep_marketplace_order() {
        let offers = vec![offer("b", 0.0, 0.0, 0.0), offer("a", 0.0, 0.0, 0.0)];
        let ranked = policy().rank(&offers, &Blacklist::new(), &HashSet::new());
        assert_eq!(ranked[0].provider_id.as_str(), "b");
        assert_eq!(ranked[1].provider_id.as_str(), "a");
    }

    #[test]
    fn select_skips_busy_and_blacklisted() {
        let offers = vec![
            offer("a", 0.0, 0.0, 0.0),
            offer("b", 0.0, 0.0, 0.0),
            offer("c", 0.5, 0.0, 0.0),
        ];
        let mut blacklist = Blacklist::new();
        blacklist.insert(ProviderId::new("a"));
        let busy: HashSet<ProviderId> = [ProviderId::new("b")].into_iter().collect();
        let chosen = policy().select(&offers, &blacklist, &busy).unwrap();
        assert_eq!(chosen.provider_id.as_str(), "c");
    }

    #[test]
    fn zero_caps_only_accept_free_offers() {
        let policy = SelectionPolicy::new(PriceLimits::default());
        let offers = vec![offer("paid", 0.0, 0.0001, 0.0), offer("free", 0.0, 0.0, 0.0)];
        let chosen = policy
            .select(&offers, &Blacklist::new(), &HashSet::new())
            .unwrap();
        assert_eq!(chosen.provider_id.as_str(), "free");
    }

    #[test]
    fn blacklist_is_append_only() {
        let mut blacklist = Blacklist::new();
        assert!(blacklist.insert(ProviderId::new("p")));
        assert!(!blacklist.insert(ProviderId::new("p")));
        assert_eq!(blacklist.len(), 1);
        assert_eq!(blacklist.providers(), vec![ProviderId::new("p")]);
    }
}

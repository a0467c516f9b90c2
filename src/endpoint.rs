//! Random selection of one mirror from the list of interchangeable data endpoints.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// Picks data endpoints uniformly at random.
///
/// The generator sits behind a mutex so a single selector can be shared between
/// the poll task and anything else that needs a mirror.
pub struct EndpointSelector {
    rng: Mutex<StdRng>,
}

impl EndpointSelector {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Deterministic selector, used by tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Returns one of `urls`, or an empty string when there is nothing to choose from.
    pub fn choose_random_url(&self, urls: &[String]) -> String {
        match urls.len() {
            0 => String::new(),
            1 => urls[0].clone(),
            len => {
                let index = self.rng.lock().random_range(0..len);
                urls[index].clone()
            }
        }
    }
}

impl Default for EndpointSelector {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper over a thread-local generator.
pub fn choose_random_url(urls: Option<&[String]>) -> String {
    match urls {
        Some(urls) if !urls.is_empty() => {
            let index = rand::rng().random_range(0..urls.len());
            urls[index].clone()
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn urls(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_empty_list_yields_empty_string() {
        let selector = EndpointSelector::with_seed(1);
        assert_eq!(selector.choose_random_url(&[]), "");
        assert_eq!(choose_random_url(None), "");
        assert_eq!(choose_random_url(Some(&[])), "");
    }

    #[test]
    fn test_single_entry_is_always_chosen() {
        let selector = EndpointSelector::with_seed(1);
        let list = urls(&["a"]);
        assert_eq!(selector.choose_random_url(&list), "a");
        assert_eq!(choose_random_url(Some(&list)), "a");
    }

    #[test]
    fn test_every_mirror_gets_picked_eventually() {
        let selector = EndpointSelector::with_seed(42);
        let list = urls(&["https://a", "https://b", "https://c"]);

        let seen: HashSet<String> = (0..200)
            .map(|_| selector.choose_random_url(&list))
            .collect();

        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_concurrent_callers_share_one_selector() {
        let selector = EndpointSelector::with_seed(7);
        let list = urls(&["x", "y"]);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        let chosen = selector.choose_random_url(&list);
                        assert!(chosen == "x" || chosen == "y");
                    }
                });
            }
        });
    }
}

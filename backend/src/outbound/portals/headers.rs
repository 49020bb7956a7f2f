//! Browser-like request headers, rotated per request.

use std::sync::Mutex;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

const USER_AGENTS: [&str; 8] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 18_3 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.3 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 18_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.5 Mobile/15E148 Safari/604.1",
];

const ACCEPT_LANGUAGES: [&str; 3] = [
    "pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7",
    "pt-BR,pt;q=0.9,en;q=0.8",
    "pt-BR,pt;q=0.8,en-US;q=0.5,en;q=0.3",
];

/// One header set to send with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserHeaders {
    /// `User-Agent` value.
    pub user_agent: &'static str,
    /// `Accept-Language` value.
    pub accept_language: &'static str,
    /// Whether the user agent is a mobile browser.
    pub mobile: bool,
}

impl BrowserHeaders {
    /// Name/value pairs in send order.
    pub fn pairs(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("User-Agent", self.user_agent),
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
            ("Accept-Language", self.accept_language),
            ("Cache-Control", "max-age=0"),
            ("Upgrade-Insecure-Requests", "1"),
            ("Sec-Fetch-Dest", "document"),
            ("Sec-Fetch-Mode", "navigate"),
            ("Sec-Fetch-Site", "none"),
            ("Sec-Fetch-User", "?1"),
            ("Sec-Ch-Ua-Mobile", if self.mobile { "?1" } else { "?0" }),
        ]
    }
}

/// Picks a random browser identity for every request.
pub struct HeaderRotation {
    rng: Mutex<SmallRng>,
}

impl HeaderRotation {
    /// Rotation seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    /// Rotation with a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Draw the next header set.
    pub fn next_headers(&self) -> BrowserHeaders {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let user_agent = USER_AGENTS
            .choose(&mut *rng)
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        let accept_language = ACCEPT_LANGUAGES
            .choose(&mut *rng)
            .copied()
            .unwrap_or(ACCEPT_LANGUAGES[0]);
        BrowserHeaders {
            user_agent,
            accept_language,
            mobile: ["Mobile", "iPhone", "Android"]
                .iter()
                .any(|marker| user_agent.contains(marker)),
        }
    }
}

impl Default for HeaderRotation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_from_the_browser_pools() {
        let rotation = HeaderRotation::seeded(7);
        for _ in 0..20 {
            let headers = rotation.next_headers();
            assert!(USER_AGENTS.contains(&headers.user_agent));
            assert!(ACCEPT_LANGUAGES.contains(&headers.accept_language));
            assert_eq!(headers.mobile, headers.user_agent.contains("Mobile"));
        }
    }

    #[test]
    fn rotates_across_requests() {
        let rotation = HeaderRotation::seeded(42);
        let agents: std::collections::HashSet<_> =
            (0..50).map(|_| rotation.next_headers().user_agent).collect();
        assert!(agents.len() > 1);
    }

    #[test]
    fn mobile_flag_drives_client_hint() {
        let headers = BrowserHeaders {
            user_agent: USER_AGENTS[4],
            accept_language: ACCEPT_LANGUAGES[0],
            mobile: true,
        };
        assert!(headers.pairs().contains(&("Sec-Ch-Ua-Mobile", "?1")));
    }
}

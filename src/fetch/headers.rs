use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, REFERER, USER_AGENT};

pub const USER_AGENTS: [&str; 6] = [
    // Desktop
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    // Mobile
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Mobile Safari/537.36",
];

pub const ACCEPT_LANGUAGES: [&str; 4] = [
    "en-IN,en;q=0.9",
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9",
    "en-IN,hi-IN;q=0.8,en;q=0.7",
];

const PORTAL_REFERER: &str = "https://eportal.incometax.gov.in/iec/foportal/en/";

/// Browser-like headers with a randomly chosen user agent and language.
/// Returns the user-agent index alongside for logging.
pub fn build_headers<R: Rng>(rng: &mut R) -> (HeaderMap, usize) {
    let ua_idx = rng.gen_range(0..USER_AGENTS.len());
    let lang = ACCEPT_LANGUAGES.choose(rng).copied().unwrap_or(ACCEPT_LANGUAGES[0]);

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENTS[ua_idx]));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(lang));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(REFERER, HeaderValue::from_static(PORTAL_REFERER));
    (headers, ua_idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn headers_come_from_fixed_pools() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let (h, idx) = build_headers(&mut rng);
            assert_eq!(h.get(USER_AGENT).unwrap(), USER_AGENTS[idx]);
            let lang = h.get(ACCEPT_LANGUAGE).unwrap().to_str().unwrap();
            assert!(ACCEPT_LANGUAGES.contains(&lang));
            assert_eq!(h.get(REFERER).unwrap(), PORTAL_REFERER);
        }
    }

    #[test]
    fn user_agent_varies_across_requests() {
        let mut rng = StdRng::seed_from_u64(1);
        let picks: std::collections::HashSet<usize> =
            (0..100).map(|_| build_headers(&mut rng).1).collect();
        assert!(picks.len() > 1);
    }
}

//! Browser-identity helpers: a small pool of plausible desktop user-agent
//! profiles and a jittered delay for polite crawling.

use rand::prelude::SliceRandom;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UserAgentProfile {
    pub user_agent: &'static str,
    pub viewport: (u32, u32),
    pub platform: &'static str,
}

const DESKTOP_PROFILES: &[UserAgentProfile] = &[
    UserAgentProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        viewport: (1920, 1080),
        platform: "Win32",
    },
    UserAgentProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        viewport: (1440, 900),
        platform: "MacIntel",
    },
    UserAgentProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        viewport: (1920, 1080),
        platform: "Linux x86_64",
    },
    UserAgentProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
        viewport: (1536, 864),
        platform: "Win32",
    },
    UserAgentProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
        viewport: (1680, 1050),
        platform: "MacIntel",
    },
];

/// Pick a random desktop profile for this navigation.
pub fn random_profile() -> &'static UserAgentProfile {
    let mut rng = rand::thread_rng();
    // The pool is a non-empty const slice.
    DESKTOP_PROFILES
        .choose(&mut rng)
        .unwrap_or(&DESKTOP_PROFILES[0])
}

/// Sleep for `base_ms` plus a uniform jitter in `[0, jitter_ms]`.
///
/// A zero/zero call returns immediately, which is how tests opt out.
pub async fn polite_delay(base_ms: u64, jitter_ms: u64) {
    let extra = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    let total = base_ms.saturating_add(extra);
    if total > 0 {
        tokio::time::sleep(Duration::from_millis(total)).await;
    }
}

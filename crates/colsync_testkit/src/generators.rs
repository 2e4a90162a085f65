//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records that satisfy the payload
//! validity rules, plus a few deliberately broken shapes.

use colsync_engine::{Login, Place};
use colsync_protocol::{Guid, MicrosecondTimestamp, Visit, VisitType};
use proptest::prelude::*;
use rand::Rng;

/// Strategy for generating 12-character URL-safe GUIDs.
pub fn guid_strategy() -> impl Strategy<Value = Guid> {
    prop::string::string_regex("[A-Za-z0-9_-]{12}")
        .expect("Invalid regex")
        .prop_map(Guid::new)
}

/// Strategy for generating visit types.
pub fn visit_type_strategy() -> impl Strategy<Value = VisitType> {
    (1u8..=9).prop_map(|code| VisitType::from_code(code).expect("Code in range"))
}

/// Strategy for generating microsecond visit dates within a plausible range.
pub fn visit_date_strategy() -> impl Strategy<Value = MicrosecondTimestamp> {
    1_500_000_000_000_000u64..1_800_000_000_000_000u64
}

/// Strategy for generating up to `max` visits.
pub fn visits_strategy(max: usize) -> impl Strategy<Value = Vec<Visit>> {
    prop::collection::vec(
        (visit_date_strategy(), visit_type_strategy()).prop_map(|(d, t)| Visit::new(d, t)),
        0..=max,
    )
}

/// Strategy for generating URLs with synced or ignored schemes.
pub fn url_strategy() -> impl Strategy<Value = String> {
    let scheme = prop_oneof![
        4 => Just("https"),
        2 => Just("http"),
        1 => Just("about"),
        1 => Just("file"),
    ];
    (
        scheme,
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
    )
        .prop_map(|(scheme, host)| match scheme {
            "about" => format!("about:{host}"),
            "file" => format!("file:///tmp/{host}"),
            _ => format!("{scheme}://{host}.example.com/"),
        })
}

/// Strategy for generating places with visits.
pub fn place_strategy() -> impl Strategy<Value = (Place, Vec<Visit>)> {
    (
        guid_strategy(),
        url_strategy(),
        prop::string::string_regex("[ -~]{0,40}").expect("Invalid regex"),
        visits_strategy(5),
    )
        .prop_map(|(guid, url, title, visits)| (Place::new(guid, url, title), visits))
}

/// Strategy for generating valid form logins.
///
/// Times are whole milliseconds so they survive the microsecond to
/// millisecond wire conversion.
pub fn login_strategy() -> impl Strategy<Value = Login> {
    (
        guid_strategy(),
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
        prop::option::of(prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex")),
        prop::string::string_regex("[!-~]{1,24}").expect("Invalid regex"),
        0u64..1000,
        1_500_000_000_000u64..1_800_000_000_000u64,
    )
        .prop_map(|(guid, host, username, password, times_used, created_ms)| {
            let hostname = format!("https://{host}.example.com");
            Login {
                guid,
                form_submit_url: Some(hostname.clone()),
                hostname,
                username,
                password,
                times_used,
                time_created: created_ms * 1000,
                time_last_used: created_ms * 1000,
                time_password_changed: created_ms * 1000,
                ..Login::default()
            }
        })
}

/// Strategy for generating a set of logins with distinct GUIDs.
pub fn login_set_strategy(max: usize) -> impl Strategy<Value = Vec<Login>> {
    prop::collection::btree_map(guid_strategy(), login_strategy(), 0..=max).prop_map(|map| {
        map.into_iter()
            .map(|(guid, login)| Login { guid, ..login })
            .collect()
    })
}

/// Generates `count` random places outside of proptest, for simulations.
pub fn random_places(count: usize) -> Vec<(Place, Vec<Visit>)> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let place = Place::new(
                Guid::random(),
                format!("https://host{}.example.com/{i}", rng.gen_range(0..100)),
                format!("Page {i}"),
            );
            let visits = (0..rng.gen_range(1..4))
                .map(|_| {
                    Visit::new(
                        rng.gen_range(1_500_000_000_000_000..1_800_000_000_000_000),
                        VisitType::Link,
                    )
                })
                .collect();
            (place, visits)
        })
        .collect()
}

/// Generates `count` random logins outside of proptest, for simulations.
pub fn random_logins(count: usize) -> Vec<Login> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let created = rng.gen_range(1_500_000_000_000u64..1_800_000_000_000) * 1000;
            let hostname = format!("https://site{i}.example.com");
            Login {
                guid: Guid::random(),
                form_submit_url: Some(hostname.clone()),
                hostname,
                username: Some(format!("user{i}")),
                password: format!("pw{}", rng.gen::<u32>()),
                time_created: created,
                time_last_used: created,
                time_password_changed: created,
                ..Login::default()
            }
        })
        .collect()
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

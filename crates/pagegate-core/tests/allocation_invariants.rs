//! Allocation invariants under randomized request sequences.
//!
//! # Properties
//!
//! 1. An IP is never bound to two pages at once
//! 2. A cookie is never bound to two pages at once
//! 3. No page ever holds more IPs or cookies than its limits
//! 4. A request without a name is always `NoName` and never mutates
//! 5. Concurrent threads sharing one store keep properties 1-3

use std::collections::HashMap;
use std::sync::Arc;

use pagegate_core::{
    AdmissionRequest, ConfigStore, ForbiddenReason, InMemoryBackend, PageConfig, PageDocument,
    PageGate, admit,
};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

const PAGES: [&str; 3] = ["alpha", "beta", "gamma"];

fn document(max_ips: usize, max_cookies: usize) -> PageDocument {
    PAGES.iter().fold(PageDocument::new(), |doc, name| {
        doc.with_page(
            *name,
            PageConfig::new(format!("{name}.html"), max_ips, max_cookies)
                .with_aliases([name[..1].to_string()]),
        )
    })
}

fn assert_invariants(document: &PageDocument) {
    let mut ip_owner: HashMap<&str, &str> = HashMap::new();
    let mut cookie_owner: HashMap<&str, &str> = HashMap::new();

    for (name, page) in &document.pages {
        assert!(page.ips.len() <= page.max_ips, "{name} over IP capacity");
        assert!(page.cookies.len() <= page.max_cookies, "{name} over cookie capacity");
        for ip in &page.ips {
            let previous = ip_owner.insert(ip, name);
            assert!(previous.is_none(), "IP {ip} bound twice");
        }
        for cookie in &page.cookies {
            let previous = cookie_owner.insert(cookie, name);
            assert!(previous.is_none(), "cookie bound twice");
        }
    }
    document.validate().unwrap();
}

/// A request step: which page (or alias/unknown), which IP, and which cookie
/// to present (none, one previously issued, or garbage).
#[derive(Debug, Clone)]
struct Step {
    name: Option<usize>,
    use_alias: bool,
    upper_case: bool,
    ip: u8,
    cookie: CookieChoice,
}

#[derive(Debug, Clone)]
enum CookieChoice {
    None,
    Issued(usize),
    Garbage,
}

fn arb_step() -> impl Strategy<Value = Step> {
    (
        prop::option::weighted(0.9, 0usize..4),
        any::<bool>(),
        any::<bool>(),
        0u8..8,
        prop_oneof![
            3 => Just(CookieChoice::None),
            3 => (0usize..16).prop_map(CookieChoice::Issued),
            1 => Just(CookieChoice::Garbage),
        ],
    )
        .prop_map(|(name, use_alias, upper_case, ip, cookie)| Step {
            name,
            use_alias,
            upper_case,
            ip,
            cookie,
        })
}

fn to_request(step: &Step, issued: &[String]) -> AdmissionRequest {
    let mut request = AdmissionRequest::new(format!("10.0.0.{}", step.ip));
    if let Some(index) = step.name {
        let name = PAGES.get(index).map_or("nowhere".to_string(), |page| {
            if step.use_alias {
                page[..1].to_string()
            } else {
                (*page).to_string()
            }
        });
        let name = if step.upper_case {
            name.to_uppercase()
        } else {
            name
        };
        request = request.with_name(name);
    }
    match step.cookie {
        CookieChoice::None => {},
        CookieChoice::Issued(index) => {
            if !issued.is_empty() {
                request = request.with_cookie(issued[index % issued.len()].clone());
            }
        },
        CookieChoice::Garbage => request = request.with_cookie("garbage"),
    }
    request
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: bindings stay unique and within capacity for any sequence.
    #[test]
    fn prop_sequential_requests_keep_invariants(
        max_ips in 0usize..4,
        max_cookies in 0usize..4,
        steps in prop::collection::vec(arb_step(), 1..64),
        seed in any::<u64>(),
    ) {
        let mut doc = document(max_ips, max_cookies);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut issued: Vec<String> = Vec::new();

        for step in &steps {
            let request = to_request(step, &issued);
            let before = doc.clone();
            match admit(&mut doc, &request, &mut rng) {
                Ok(admission) => {
                    if admission.cookie_issued {
                        issued.push(admission.cookie.clone());
                    }
                    let page = doc.page(&admission.page).unwrap();
                    prop_assert!(page.holds_ip(&request.remote_ip));
                    prop_assert!(page.holds_cookie(&admission.cookie));
                },
                Err(rejection) => {
                    prop_assert_eq!(&doc, &before);
                    if request.requested_name.is_none() {
                        prop_assert_eq!(rejection.reason, ForbiddenReason::NoName);
                    }
                },
            }
            assert_invariants(&doc);
        }
    }

    /// Property: a full page never admits a new IP.
    #[test]
    fn prop_full_page_admits_no_new_ip(
        bound in prop::collection::hash_set(0u8..32, 1..4),
        newcomer in 32u8..64,
    ) {
        let ips: Vec<String> = bound.iter().map(|n| format!("10.1.0.{n}")).collect();
        let mut doc = PageDocument::new().with_page(
            "alpha",
            PageConfig::new("alpha.html", ips.len(), 10).with_ips(ips.clone()),
        );
        let mut rng = StdRng::seed_from_u64(1);

        let request = AdmissionRequest::new(format!("10.1.0.{newcomer}")).with_name("alpha");
        let rejection = admit(&mut doc, &request, &mut rng).unwrap_err();
        prop_assert_eq!(rejection.reason, ForbiddenReason::MaxIpsReached);

        for ip in &ips {
            let request = AdmissionRequest::new(ip.clone()).with_name("alpha");
            prop_assert!(admit(&mut doc, &request, &mut rng).is_ok());
        }
    }

    /// Property: names that match nothing are `NoPage`.
    #[test]
    fn prop_unmatched_names_are_no_page(name in "[a-zA-Z0-9 ]{0,12}") {
        let mut doc = document(4, 4);
        prop_assume!(doc.resolve(&name).is_none());
        let request = AdmissionRequest::new("10.0.0.1").with_name(name);
        let rejection = admit(&mut doc, &request, &mut StdRng::seed_from_u64(2)).unwrap_err();
        prop_assert_eq!(rejection.reason, ForbiddenReason::NoPage);
    }
}

#[test]
fn concurrent_requests_never_double_bind() {
    let backend = Arc::new(InMemoryBackend::new(document(3, 3)));
    let gate = PageGate::new(ConfigStore::new(backend.clone()));

    let handles: Vec<_> = (0..8u8)
        .map(|worker| {
            let gate = gate.clone();
            std::thread::spawn(move || {
                let mut granted = 0usize;
                for round in 0..24u8 {
                    let page = PAGES[usize::from((worker + round) % 3)];
                    let request = AdmissionRequest::new(format!("10.2.{worker}.{}", round % 4))
                        .with_name(page);
                    if gate.handle(&request).unwrap().is_ok() {
                        granted += 1;
                    }
                }
                granted
            })
        })
        .collect();

    let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let final_doc = backend.current();
    assert_invariants(&final_doc);

    let bound_cookies: usize = final_doc.pages.values().map(|p| p.cookies.len()).sum();
    assert_eq!(granted, bound_cookies, "every grant without cookie issues one");
    assert!(bound_cookies <= PAGES.len() * 3);
}

#[test]
fn last_slot_race_has_one_winner() {
    let backend = Arc::new(InMemoryBackend::new(
        PageDocument::new().with_page("alpha", PageConfig::new("alpha.html", 1, 1)),
    ));
    let gate = PageGate::new(ConfigStore::new(backend.clone()));

    let handles: Vec<_> = (0..16u8)
        .map(|n| {
            let gate = gate.clone();
            std::thread::spawn(move || {
                gate.handle(&AdmissionRequest::new(format!("10.3.0.{n}")).with_name("alpha"))
                    .unwrap()
                    .is_ok()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .filter_map(|h| h.join().ok())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(backend.current().page("alpha").unwrap().ips.len(), 1);
}

//! Property tests for failure grouping

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use stateprobe_core::{
    Case, Check, Failure, FailureKind, Headers, OperationRef, Request, Response, Status,
    group_failures_by_code_sample,
};

const PATHS: [&str; 3] = ["/a", "/b", "/c"];

/// (path index, status code, body, failure index) per failed check
type Shape = (usize, u16, Vec<u8>, usize);

fn arb_shapes() -> impl Strategy<Value = Vec<Shape>> {
    prop::collection::vec(
        (
            0..PATHS.len(),
            prop::sample::select(vec![500u16, 502, 503]),
            prop::collection::vec(any::<u8>(), 0..2),
            0..3usize,
        ),
        0..16,
    )
}

fn build(shapes: &[Shape]) -> Vec<Check> {
    shapes
        .iter()
        .enumerate()
        .map(|(i, (path, status_code, body, failure))| {
            let op = Arc::new(OperationRef::new("GET", PATHS[*path], "http://api"));
            let case = Case::new(format!("c{i}"), op);
            let request = Request {
                method: "GET".into(),
                uri: case.url(),
                headers: Headers::new(),
                body: None,
            };
            let response = Response {
                status_code: *status_code,
                message: String::new(),
                headers: Headers::new(),
                content: body.clone(),
                http_version: "HTTP/1.1".into(),
                elapsed: Duration::ZERO,
                verify: true,
            };
            // Failures repeat across checks, statuses and bodies
            let failure = Failure::new(
                format!("GET {}", PATHS[*path]),
                FailureKind::Custom,
                "Custom check failed",
                format!("failure #{failure}"),
            );
            Check::new(
                "custom",
                Status::Failure,
                Arc::new(request),
                Arc::new(response),
                Arc::new(case),
                Some(failure),
            )
        })
        .collect()
}

/// (code sample, status code, body, failure message) of one failed check
type Occurrence = (String, u16, Vec<u8>, String);

fn occurrence(check: &Check) -> Occurrence {
    (
        check.code_sample().to_string(),
        check.response.status_code,
        check.response.content.clone(),
        check.failure.as_ref().map(|f| f.message.clone()).unwrap_or_default(),
    )
}

/// Groups as (code sample, failure messages) for comparison
fn summarize(checks: &[Check]) -> Vec<(String, Vec<String>)> {
    group_failures_by_code_sample(checks)
        .map(|(sample, group)| {
            let messages = group
                .iter()
                .filter_map(|c| c.failure.as_ref().map(|f| f.message.clone()))
                .collect();
            (sample.to_string(), messages)
        })
        .collect()
}

proptest! {
    /// Every distinct (signature, failure) pair lands in exactly one group
    #[test]
    fn groups_partition_failed_checks(shapes in arb_shapes()) {
        let checks = build(&shapes);

        let mut seen: Vec<Occurrence> = group_failures_by_code_sample(&checks)
            .flat_map(|(_, group)| group.into_iter().map(occurrence))
            .collect();
        seen.sort();
        let mut expected: Vec<Occurrence> = checks.iter().map(occurrence).collect();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(seen, expected);
    }

    /// Equal failures under different status codes are never merged
    #[test]
    fn status_code_is_part_of_the_group_key(shapes in arb_shapes()) {
        let checks = build(&shapes);
        let moved: Vec<Shape> = shapes
            .iter()
            .map(|(path, _, body, failure)| (*path, 504, body.clone(), *failure))
            .collect();
        let moved = build(&moved);
        let mut doubled = checks.clone();
        doubled.extend(moved.iter().cloned());

        let groups: Vec<_> = group_failures_by_code_sample(&doubled).collect();
        let at_504: usize = groups
            .iter()
            .filter(|(_, group)| group[0].response.status_code == 504)
            .map(|(_, group)| group.len())
            .sum();
        let mut unique: Vec<Occurrence> = moved.iter().map(occurrence).collect();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(at_504, unique.len());
    }

    /// Members of one group share status code and body
    #[test]
    fn groups_share_reproduction_signature(shapes in arb_shapes()) {
        let checks = build(&shapes);
        for (sample, group) in group_failures_by_code_sample(&checks) {
            let first = group[0];
            for check in &group {
                prop_assert_eq!(check.code_sample(), sample);
                prop_assert_eq!(check.response.status_code, first.response.status_code);
                prop_assert_eq!(&check.response.content, &first.response.content);
            }
        }
    }

    /// Input order does not change groups or their internal order
    #[test]
    fn grouping_is_stable_under_reordering(
        (shapes, order) in arb_shapes().prop_flat_map(|shapes| {
            let n = shapes.len();
            (Just(shapes), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
        })
    ) {
        let checks = build(&shapes);
        let reordered: Vec<Check> = order.iter().map(|&i| checks[i].clone()).collect();
        prop_assert_eq!(summarize(&checks), summarize(&reordered));
    }
}

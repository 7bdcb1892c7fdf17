//! Failure deduplication: group failed checks by how they reproduce
//!
//! Two failed checks belong to the same group when replaying them gives the
//! same command, status code and response body. Within a group every check
//! carries a distinct [`Failure`]; the same failure seen under two signatures
//! is kept in both groups.

use std::collections::HashMap;

use crate::check::Check;
use crate::failure::Failure;

/// Response body as a grouping key. An empty body is its own variant, so it
/// can never compare equal to real content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum BodyKey<'a> {
    Empty,
    Content(&'a [u8]),
}

impl<'a> BodyKey<'a> {
    fn of(check: &'a Check) -> Self {
        if check.response.content.is_empty() {
            Self::Empty
        } else {
            Self::Content(&check.response.content)
        }
    }
}

type GroupKey<'a> = (&'a str, u16, BodyKey<'a>);

fn group_key(check: &Check) -> GroupKey<'_> {
    (check.code_sample(), check.response.status_code, BodyKey::of(check))
}

/// Group failed checks by reproduction signature.
///
/// Checks without a failure are skipped. Checks with equal failures and the
/// same `(code_sample, status_code, body)` collapse into one (the last one
/// wins). The rest are ordered by
/// `(code_sample, status_code, body)` and consecutive equal keys form a
/// group. Failures inside a group are ordered by their own fields, so the
/// output does not depend on the order of `checks` when every failure is
/// distinct.
///
/// The returned iterator is single-pass; collect it to walk it twice.
pub fn group_failures_by_code_sample(
    checks: &[Check],
) -> impl Iterator<Item = (&str, Vec<&Check>)> {
    let mut unique: HashMap<(GroupKey<'_>, &Failure), &Check> = HashMap::new();
    for check in checks {
        if let Some(failure) = &check.failure {
            unique.insert((group_key(check), failure), check);
        }
    }

    let mut deduped: Vec<&Check> = unique.into_values().collect();
    deduped.sort_by(|a, b| {
        group_key(a)
            .cmp(&group_key(b))
            .then_with(|| match (&a.failure, &b.failure) {
                (Some(fa), Some(fb)) => fa.cmp_identity(fb),
                _ => std::cmp::Ordering::Equal,
            })
    });

    let groups: Vec<Vec<&Check>> = deduped
        .chunk_by(|a, b| group_key(a) == group_key(b))
        .map(<[&Check]>::to_vec)
        .collect();

    groups.into_iter().map(|group| {
        let first: &Check = group[0];
        (first.code_sample(), group)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{Case, OperationRef};
    use crate::check::Status;
    use crate::failure::FailureKind;
    use crate::http::{Headers, Request, Response};
    use std::sync::Arc;
    use std::time::Duration;

    fn check(path: &str, status_code: u16, body: &[u8], failure: Option<Failure>) -> Check {
        let op = Arc::new(OperationRef::new("GET", path, "http://api"));
        let case = Case::new("c", op);
        let request = Request {
            method: "GET".into(),
            uri: case.url(),
            headers: Headers::new(),
            body: None,
        };
        let response = Response {
            status_code,
            message: String::new(),
            headers: Headers::new(),
            content: body.to_vec(),
            http_version: "HTTP/1.1".into(),
            elapsed: Duration::from_millis(1),
            verify: true,
        };
        let status = if failure.is_some() {
            Status::Failure
        } else {
            Status::Success
        };
        Check::new(
            "test_check",
            status,
            Arc::new(request),
            Arc::new(response),
            Arc::new(case),
            failure,
        )
    }

    fn custom(message: &str) -> Failure {
        Failure::new("GET /a", FailureKind::Custom, "Custom check failed", message)
    }

    #[test]
    fn empty_input_gives_no_groups() {
        assert_eq!(group_failures_by_code_sample(&[]).count(), 0);
    }

    #[test]
    fn passing_checks_are_ignored() {
        let checks = vec![check("/a", 200, b"ok", None), check("/b", 200, b"ok", None)];
        assert_eq!(group_failures_by_code_sample(&checks).count(), 0);
    }

    #[test]
    fn equal_failures_collapse_to_last_seen() {
        let checks = vec![
            check("/a", 500, b"boom", Some(custom("same"))),
            check("/a", 500, b"boom", Some(custom("same"))),
        ];
        let groups: Vec<_> = group_failures_by_code_sample(&checks).collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 1);
        assert!(std::ptr::eq(groups[0].1[0], &checks[1]));
    }

    #[test]
    fn equal_failures_under_different_statuses_stay_apart() {
        let checks = vec![
            check("/a", 500, b"boom", Some(custom("same"))),
            check("/a", 502, b"boom", Some(custom("same"))),
            check("/a", 500, b"boom", Some(custom("same"))),
        ];
        let groups: Vec<_> = group_failures_by_code_sample(&checks).collect();
        assert_eq!(groups.len(), 2);
        let statuses: Vec<u16> = groups
            .iter()
            .map(|(_, group)| group[0].response.status_code)
            .collect();
        assert_eq!(statuses, vec![500, 502]);
        assert!(groups.iter().all(|(_, group)| group.len() == 1));
    }

    #[test]
    fn equal_failures_with_different_bodies_stay_apart() {
        let checks = vec![
            check("/a", 500, b"first", Some(custom("same"))),
            check("/a", 500, b"", Some(custom("same"))),
        ];
        let groups: Vec<_> = group_failures_by_code_sample(&checks).collect();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].1[0].response.content.is_empty());
    }

    #[test]
    fn distinct_failures_sharing_a_signature_form_one_group() {
        let checks = vec![
            check("/a", 500, b"boom", Some(custom("two"))),
            check("/a", 500, b"boom", Some(custom("one"))),
        ];
        let groups: Vec<_> = group_failures_by_code_sample(&checks).collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "curl -X GET 'http://api/a'");
        let messages: Vec<_> = groups[0]
            .1
            .iter()
            .map(|c| c.failure.as_ref().map(|f| f.message.as_str()))
            .collect();
        assert_eq!(messages, vec![Some("one"), Some("two")]);
    }

    #[test]
    fn status_code_splits_groups() {
        let checks = vec![
            check("/a", 500, b"boom", Some(custom("x"))),
            check("/a", 502, b"boom", Some(custom("y"))),
        ];
        let groups: Vec<_> = group_failures_by_code_sample(&checks).collect();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1[0].response.status_code, 500);
        assert_eq!(groups[1].1[0].response.status_code, 502);
    }

    #[test]
    fn empty_body_never_matches_content() {
        let checks = vec![
            check("/a", 500, b"", Some(custom("x"))),
            check("/a", 500, b"\0", Some(custom("y"))),
        ];
        let groups: Vec<_> = group_failures_by_code_sample(&checks).collect();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].1[0].response.content.is_empty());
    }

    #[test]
    fn groups_are_ordered_by_code_sample() {
        let checks = vec![
            check("/zeta", 500, b"", Some(custom("z"))),
            check("/alpha", 500, b"", Some(custom("a"))),
        ];
        let samples: Vec<&str> = group_failures_by_code_sample(&checks)
            .map(|(sample, _)| sample)
            .collect();
        assert_eq!(
            samples,
            vec!["curl -X GET 'http://api/alpha'", "curl -X GET 'http://api/zeta'"]
        );
    }
}

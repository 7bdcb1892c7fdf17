//! Masking of credentials in reports and reproduction commands

use std::collections::BTreeMap;

use crate::check::Check;
use crate::report::SerializedCheck;

/// Headers whose values never leave the process unmasked.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "x-auth-token",
    "cookie",
    "set-cookie",
    "proxy-authorization",
];

/// Replacement for masked values.
pub const MASK: &str = "[Filtered]";

/// Case-insensitive match against the sensitive header list.
#[must_use]
pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|&h| name.eq_ignore_ascii_case(h))
}

fn mask_single(headers: &mut BTreeMap<String, String>) {
    for (name, value) in headers.iter_mut() {
        if is_sensitive_header(name) {
            *value = MASK.to_string();
        }
    }
}

/// Mask every value of sensitive headers in a multi-valued header map.
pub fn mask_headers(headers: &mut BTreeMap<String, Vec<String>>) {
    for (name, values) in headers.iter_mut() {
        if is_sensitive_header(name) {
            for value in values.iter_mut() {
                *value = MASK.to_string();
            }
        }
    }
}

/// Mask request, response and case headers plus case cookies in place.
pub fn mask_serialized_check(check: &mut SerializedCheck) {
    mask_headers(&mut check.request.headers);
    mask_headers(&mut check.response.headers);
    mask_single(&mut check.case.headers);
    for value in check.case.cookies.values_mut() {
        *value = MASK.to_string();
    }
}

/// The check's reproduction command with credentials masked.
///
/// Unlike [`Check::code_sample`] this is not cached.
#[must_use]
pub fn sanitized_code_sample(check: &Check) -> String {
    let mut case = check.case.partial_deepcopy();
    mask_single(&mut case.headers);
    for value in case.cookies.values_mut() {
        *value = MASK.to_string();
    }
    let mut sent = check.request.headers.first_values();
    mask_single(&mut sent);
    case.as_curl_command(&sent, check.response.verify)
}

//! Case conversion between attribute names and Ksyun API parameter names
//!
//! Attributes use snake_case (e.g., `cidr_block`, `dhcp_ip_from`).
//! The Ksyun query API uses PascalCase (e.g., `CidrBlock`, `DhcpIpFrom`),
//! with dots separating nested segments. Filter keys use kebab-case
//! (e.g., `vpc-id`).

use heck::{ToKebabCase, ToSnakeCase, ToUpperCamelCase};

/// Convert a dotted snake_case attribute path to a PascalCase parameter path
/// e.g., "segment_one.segment_two" -> "SegmentOne.SegmentTwo"
pub fn to_camel_case(path: &str) -> String {
    path.split('.')
        .map(|segment| {
            if segment.chars().all(|c| c.is_ascii_digit()) {
                segment.to_string()
            } else {
                segment.to_upper_camel_case()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Convert a PascalCase response field name to snake_case
/// e.g., "DhcpIpFrom" -> "dhcp_ip_from"
pub fn to_snake_case(s: &str) -> String {
    s.to_snake_case()
}

/// Convert an attribute name to a filter key
/// e.g., "vpc_id" -> "vpc-id"
pub fn to_filter_key(s: &str) -> String {
    s.to_kebab_case()
}

//! Token Extraction Tests

use std::collections::HashMap;
use torii::auth::{extract_token, AuthError, AuthRequest};

const TOKENS: &[&str] = &[
    "eyJhbGciOiJIUzI1NiJ9.eyJlbWFpbCI6ImFAeC5jb20ifQ.c2ln",
    "a.b.c",
    "opaque-token-without-dots",
];

#[test]
fn test_absent_for_any_other_headers() {
    let cases: Vec<Vec<(&str, &str)>> = vec![
        vec![],
        vec![("Cookie", "a=b")],
        vec![("X-Authorization", "Bearer a.b.c")],
        vec![("Authorisation", "Bearer a.b.c"), ("Host", "example.com")],
    ];

    for headers in cases {
        let request = headers
            .iter()
            .fold(AuthRequest::new(), |req, (name, value)| req.with_header(name, value));
        let result = extract_token(&request, "authorization");
        assert!(matches!(result, Err(AuthError::TokenAbsent)), "{:?}", request);
    }
}

#[test]
fn test_exactly_one_scheme_tag_stripped() {
    let layouts = ["Bearer {}", "Bearer  {}", "  Bearer {}  ", "Bearer\t{}", "Bearer \t {}\n"];

    for token in TOKENS {
        for layout in layouts {
            let value = layout.replace("{}", token);
            let request = AuthRequest::new().with_header("Authorization", &value);
            assert_eq!(
                extract_token(&request, "authorization").unwrap(),
                *token,
                "value {:?}",
                value
            );
        }
    }
}

#[test]
fn test_inner_whitespace_collapsed() {
    let request = AuthRequest::new().with_header("Authorization", "Bearer   part1    part2");
    assert_eq!(
        extract_token(&request, "authorization").unwrap(),
        "part1 part2"
    );
}

#[test]
fn test_scheme_only_yields_empty_token() {
    let request = AuthRequest::new().with_header("Authorization", "Bearer");
    assert_eq!(extract_token(&request, "authorization").unwrap(), "");
}

#[test]
fn test_header_map_from_transport() {
    let headers: HashMap<String, String> =
        [("X-Forwarded-Access-Token".to_string(), "a.b.c".to_string())].into();
    let request = AuthRequest::from(headers);
    assert_eq!(
        extract_token(&request, "x-forwarded-access-token").unwrap(),
        "a.b.c"
    );
    assert_eq!(
        extract_token(&request, "X-Forwarded-Access-Token").unwrap(),
        "a.b.c"
    );
}

// Cross-origin negotiation

use crate::config::Cross;
use crate::context::Context;
use http::Method;

/// Access-Control values echoed back for an accepted request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiation {
    pub origin: Option<String>,
    pub method: Option<String>,
    pub headers: Option<String>,
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

fn contains(values: &[String], target: &str) -> bool {
    let target = target.trim().to_lowercase();
    values.iter().any(|v| v.trim().to_lowercase() == target)
}

fn contains_all(requested: &[String], allowed: &[String]) -> bool {
    requested.iter().all(|r| contains(allowed, r))
}

/// Exact or prefix match, case-insensitive.
fn contains_origin(origins: &[String], origin: &str) -> bool {
    let origin = origin.trim().to_lowercase();
    origins
        .iter()
        .map(|o| o.trim().to_lowercase())
        .filter(|o| !o.is_empty())
        .any(|o| origin == o || origin.starts_with(&o))
}

impl Cross {
    fn open(single: &str, list: &[String]) -> bool {
        single == "*" || single.is_empty() || contains(list, "*")
    }

    /// Check a request's Origin, Access-Control-Request-Method and
    /// Access-Control-Request-Headers against this policy.
    ///
    /// Returns `None` when the policy is disabled or a check fails.
    pub fn negotiate(
        &self,
        origin: Option<&str>,
        method: Option<&str>,
        headers: Option<&str>,
    ) -> Option<Negotiation> {
        if !self.allow {
            return None;
        }

        let origin_passed = Self::open(&self.origin, &self.origins)
            || origin.is_some_and(|o| contains_origin(&self.origins, o));

        let method_passed = Self::open(&self.method, &self.methods)
            || method.is_none_or(|m| contains_all(&split_csv(m), &self.methods));

        let header_passed = Self::open(&self.header, &self.headers)
            || headers.is_none_or(|h| contains_all(&split_csv(h), &self.headers));

        (origin_passed && method_passed && header_passed).then(|| Negotiation {
            origin: origin.map(str::to_string),
            method: method.map(str::to_string),
            headers: headers.map(str::to_string),
        })
    }
}

fn answers_options(ctx: &Context) -> bool {
    ctx.route()
        .is_none_or(|route| route.method.as_ref().is_none_or(|m| *m == Method::OPTIONS))
}

/// Attach Access-Control headers; answer accepted preflights directly.
pub(crate) fn crossing(ctx: &mut Context) {
    let negotiation = ctx.site().cross().negotiate(
        ctx.header("origin"),
        ctx.header("access-control-request-method"),
        ctx.header("access-control-request-headers"),
    );

    if let Some(negotiation) = negotiation {
        ctx.set_header("Access-Control-Allow-Credentials", "true");
        if let Some(origin) = &negotiation.origin {
            ctx.set_header("Access-Control-Allow-Origin", origin);
        }
        if let Some(method) = &negotiation.method {
            ctx.set_header("Access-Control-Allow-Methods", method);
        }
        if let Some(headers) = &negotiation.headers {
            ctx.set_header("Access-Control-Allow-Headers", headers);
            ctx.set_header("Access-Control-Expose-Headers", headers);
        }

        if ctx.method == Method::OPTIONS {
            ctx.set_code(200).text("cross domain access allowed.");
            return;
        }
    } else if ctx.method == Method::OPTIONS && !answers_options(ctx) {
        // Refused preflight on a route that never declared OPTIONS.
        ctx.found();
        return;
    }

    ctx.next();
}

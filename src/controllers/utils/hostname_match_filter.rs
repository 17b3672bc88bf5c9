use eater_domainmatcher::DomainPattern;
use tracing::{debug, warn};

use crate::common::DEFAULT_ROUTE_HOSTNAME;

pub struct HostnameMatchFilter<'a> {
    listener_hostname: Option<&'a str>,
    route_hostnames: &'a [String],
}

impl<'a> HostnameMatchFilter<'a> {
    pub fn new(listener_hostname: Option<&'a str>, route_hostnames: &'a [String]) -> Self {
        Self { listener_hostname, route_hostnames }
    }

    pub fn filter(&self) -> bool {
        if self.route_hostnames.is_empty() {
            return true;
        }

        let listener_hostname = self.listener_hostname.unwrap_or_default();
        self.route_hostnames.iter().any(|route_hostname| {
            let res = hostnames_match(listener_hostname, route_hostname);
            debug!("Comparing hostnames {listener_hostname} {route_hostname} {res}");
            res
        })
    }
}

fn is_any(hostname: &str) -> bool {
    hostname.is_empty() || hostname == DEFAULT_ROUTE_HOSTNAME
}

fn is_wildcard(hostname: &str) -> bool {
    hostname.starts_with("*.")
}

/// `*.example.com` stands for exactly one extra label in front of `example.com`.
fn wildcard_matches(wildcard: &str, hostname: &str) -> bool {
    match DomainPattern::<'_, '.'>::try_from(wildcard) {
        Ok(pattern) => pattern.matches(hostname),
        Err(_) => {
            warn!("Hostname is not a valid domain {wildcard}");
            false
        },
    }
}

/// Symmetric: the result does not depend on which side is the listener.
pub fn hostnames_match(this: &str, other: &str) -> bool {
    if is_any(this) || is_any(other) {
        return true;
    }
    match (is_wildcard(this), is_wildcard(other)) {
        (true, true) | (false, false) => this == other,
        (true, false) => wildcard_matches(this, other),
        (false, true) => wildcard_matches(other, this),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_testing() {
        let route_hostnames = vec!["test.com".to_owned(), "no-test.com".to_owned()];
        assert!(HostnameMatchFilter::new(Some("test.com"), &route_hostnames).filter());
        let route_hostnames = vec!["diff-test.com".to_owned(), "no-test.com".to_owned()];
        assert!(!HostnameMatchFilter::new(Some("test.com"), &route_hostnames).filter());

        let route_hostnames = vec!["blah.test.com".to_owned(), "no-test.com".to_owned()];
        assert!(HostnameMatchFilter::new(Some("*.test.com"), &route_hostnames).filter());
        let route_hostnames = vec!["test.com".to_owned(), "no-test.com".to_owned()];
        assert!(!HostnameMatchFilter::new(Some("*.test.com"), &route_hostnames).filter());
        let route_hostnames = vec!["*.test.com".to_owned()];
        assert!(HostnameMatchFilter::new(Some("*.test.com"), &route_hostnames).filter());
        let route_hostnames = vec!["even.more.test.com".to_owned()];
        assert!(!HostnameMatchFilter::new(Some("*.test.com"), &route_hostnames).filter());
        let route_hostnames = vec!["*.test.com".to_owned()];
        assert!(HostnameMatchFilter::new(Some("more.test.com"), &route_hostnames).filter());
    }

    #[test]
    fn absent_or_star_matches_everything() {
        assert!(HostnameMatchFilter::new(None, &["a.b".to_owned()]).filter());
        assert!(HostnameMatchFilter::new(Some("*"), &["a.b".to_owned()]).filter());
        assert!(HostnameMatchFilter::new(Some("a.b"), &[]).filter());
        assert!(HostnameMatchFilter::new(Some("a.b"), &["*".to_owned()]).filter());
    }

    #[test]
    fn matching_is_symmetric() {
        let hostnames = ["", "*", "test.com", "a.test.com", "b.a.test.com", "*.test.com", "*.a.test.com", "other.org", "*.org"];
        for this in hostnames {
            for other in hostnames {
                assert_eq!(hostnames_match(this, other), hostnames_match(other, this), "{this} vs {other}");
            }
        }
    }
}

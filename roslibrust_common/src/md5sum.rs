//! Helpers for computing and validating the md5sums used to fingerprint ROS
//! message and service definitions.
//!
//! A type's md5sum is computed over the concatenation of its constant and
//! field declarations (recursively expanding any non-intrinsic field types),
//! and a service's md5sum is the md5 of its request's content immediately
//! followed by its response's content. See
//! <https://wiki.ros.org/ROS/Technical%20Overview#Message_serialization_and_msg_MD5_sums>.

/// Returns true if `s` looks like a valid ROS md5sum: exactly 32 lowercase
/// hex characters, or the wildcard `"*"` used by generic subscribers.
pub fn is_valid_md5sum(s: &str) -> bool {
    s == "*" || (s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Computes the md5sum of a single piece of "md5sum content" (the
/// newline-joined `type name` lines for a message, per the ROS gentools
/// convention). Trailing whitespace is stripped before hashing, matching
/// `roslib/gentools.py`'s behavior.
pub fn compute(content: &str) -> String {
    let digest = md5::compute(content.trim_end().as_bytes());
    format!("{digest:x}")
}

/// Computes a service's md5sum from its already-computed request and
/// response md5sum content, which is the md5 of the two contents
/// concatenated (not the md5 of the two *sums* concatenated).
pub fn compute_service(request_content: &str, response_content: &str) -> String {
    let mut ctx = md5::Context::new();
    ctx.consume(request_content.trim_end().as_bytes());
    ctx.consume(response_content.trim_end().as_bytes());
    format!("{:x}", ctx.compute())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wildcard_is_valid() {
        assert!(is_valid_md5sum("*"));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(!is_valid_md5sum("abcd"));
    }

    #[test]
    fn rejects_non_hex() {
        assert!(!is_valid_md5sum(&"z".repeat(32)));
    }

    #[test]
    fn known_std_msgs_string_md5sum() {
        // std_msgs/String's sole field is `string data`
        assert_eq!(compute("string data\n"), "992ce8a1687cec8c8bd883ec73ca41d1");
    }
}

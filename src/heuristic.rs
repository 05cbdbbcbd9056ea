//! Heuristic detection of algorithmically generated names.

/// Whether the first label of `name` looks machine-generated.
///
/// Long labels with long digit runs, several digit groups, or few vowels
/// are flagged. Multi-label names are exempt (CDNs nest aggressively),
/// except the cloudfront family, whose generated labels sit under a
/// two-label suffix.
pub fn is_random_label(name: &str) -> bool {
    let name = name.strip_prefix("www.").unwrap_or(name);

    if !name.contains("cloudfront") && name.bytes().filter(|&b| b == b'.').count() > 1 {
        return false;
    }

    let Some(dot) = name.find('.') else {
        return false;
    };
    let label = &name[..dot];
    if label.len() < 10 {
        return false;
    }

    let mut digit_run = 0usize;
    let mut longest_run = 0usize;
    let mut digit_groups = 0usize;
    let mut vowels = 0usize;
    for c in label.chars() {
        if c.is_ascii_digit() {
            digit_run += 1;
            if digit_run == 1 {
                digit_groups += 1;
            }
            if digit_run > longest_run {
                longest_run = digit_run;
            }
        } else {
            digit_run = 0;
            if matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'A' | 'E' | 'I' | 'O' | 'U') {
                vowels += 1;
            }
        }
    }

    longest_run >= 5 || digit_groups >= 2 || (vowels as f32 / label.len() as f32) < 0.30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinary_names_pass() {
        assert!(!is_random_label("americanexpress.com"));
        assert!(!is_random_label("duckduckgo.com"));
    }

    #[test]
    fn short_labels_pass() {
        assert!(!is_random_label("a1b2c3.com"));
    }

    #[test]
    fn single_label_names_pass() {
        assert!(!is_random_label("localhost"));
    }

    #[test]
    fn long_digit_run_is_flagged() {
        assert!(is_random_label("abc1234567.com"));
    }

    #[test]
    fn multiple_digit_groups_are_flagged() {
        assert!(is_random_label("track1metrics2.com"));
    }

    #[test]
    fn vowel_starved_label_is_flagged() {
        assert!(is_random_label("bcdfghjklm.com"));
    }

    #[test]
    fn www_prefix_is_stripped() {
        assert!(is_random_label("www.bcdfghjklm.com"));
        assert!(!is_random_label("www.americanexpress.com"));
    }

    #[test]
    fn deep_names_are_exempt() {
        assert!(!is_random_label("xk7qz9w4mp.cdn.example.com"));
    }

    #[test]
    fn cloudfront_names_are_not_exempt() {
        assert!(is_random_label("d1k2j3h4g5f6d7.cloudfront.net"));
    }
}

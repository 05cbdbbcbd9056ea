//! Rule file parsing.
//!
//! One suffix per line; `#` starts a comment. Invalid and duplicated lines
//! are logged and skipped.

use std::fs::File;
use std::io::{self, BufRead, BufReader};

use crate::tree::{AddOutcome, NameTree};

/// Load every file in `paths` into `tree`. An unreadable file aborts the
/// whole load so the caller can keep its previous tree.
pub fn load_rules(paths: &[String], tree: &mut NameTree<()>) -> io::Result<()> {
    for path in paths {
        println!("loading rules from '{path}'");
        let reader = BufReader::new(File::open(path)?);
        let mut loaded = 0usize;
        for line in reader.lines() {
            let line = line?;
            let rule = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line.as_str(),
            }
            .trim();
            if rule.is_empty() {
                continue;
            }
            match tree.add(rule, ()) {
                AddOutcome::Added => loaded += 1,
                AddOutcome::Duplicated => println!("  duplicated rule '{rule}'"),
                AddOutcome::Invalid => println!("  invalid rule '{rule}'"),
            }
        }
        println!("  loaded {loaded} rules");
    }
    Ok(())
}

/// Log the tree size and an estimate of its footprint.
pub fn log_summary(label: &str, tree: &NameTree<()>) {
    let mem = tree.memory_estimate() as f64;
    let (scaled, unit) = if mem > 1024.0 * 1024.0 {
        (mem / (1024.0 * 1024.0), "MiB")
    } else if mem > 1024.0 {
        (mem / 1024.0, "KiB")
    } else {
        (mem, "B")
    };
    println!("{label}: {} suffixes ({scaled:.3} {unit})", tree.size());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rule_file(name: &str, content: &str) -> String {
        let path = std::env::temp_dir().join(format!("waylay-{name}-{}.rules", std::process::id()));
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let path = rule_file(
            "comments",
            "# full-line comment\n\nads.example # trailing comment\n   \n",
        );
        let mut tree = NameTree::new();

        load_rules(&[path.clone()], &mut tree).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(tree.size(), 1);
        assert!(tree.matches("ads.example"));
    }

    #[test]
    fn invalid_lines_do_not_abort_the_load() {
        let path = rule_file("invalid", "not a name!\ntracker.net\n");
        let mut tree = NameTree::new();

        load_rules(&[path.clone()], &mut tree).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(tree.size(), 1);
        assert!(tree.matches("tracker.net"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut tree = NameTree::new();

        let result = load_rules(&["/nonexistent/waylay.rules".to_string()], &mut tree);

        assert!(result.is_err());
    }

    #[test]
    fn reloading_the_same_file_yields_an_identical_tree() {
        let path = rule_file("idempotent", "ads.example\ntracker.net\n");
        let mut first = NameTree::new();
        let mut second = NameTree::new();

        load_rules(&[path.clone()], &mut first).unwrap();
        load_rules(&[path.clone()], &mut second).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(first.size(), second.size());
        for name in ["ads.example", "x.tracker.net", "other.example"] {
            assert_eq!(first.matches(name), second.matches(name));
        }
    }
}

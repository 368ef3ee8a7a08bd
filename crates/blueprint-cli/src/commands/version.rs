//! Version command - Build information

use clap::Args;
use console::Style;

/// Commit the binary was built from, when the build provides it
const COMMIT: Option<&str> = option_env!("BCTL_COMMIT");
/// Build date, when the build provides it
const BUILD_DATE: Option<&str> = option_env!("BCTL_BUILD_DATE");

/// Print version and build information
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Plain output without colors
    #[arg(short = 's', long)]
    pub short: bool,
}

pub fn run(args: VersionArgs) {
    let info = [
        ("Version", Some(env!("CARGO_PKG_VERSION"))),
        ("Commit", COMMIT),
        ("Date", BUILD_DATE),
    ];
    for line in version_lines(&info, args.short) {
        println!("{}", line);
    }
}

/// One `section value` line per non-empty entry
fn version_lines(info: &[(&str, Option<&str>)], short: bool) -> Vec<String> {
    let label = Style::new().cyan();
    info.iter()
        .filter_map(|(section, value)| Some((*section, (*value).filter(|v| !v.is_empty())?)))
        .map(|(section, value)| {
            if short {
                format!("{:<20} {}", section, value)
            } else {
                let section = format!("{}:", section);
                format!("{:<20} {}", label.apply_to(section), value)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_entries_are_skipped() {
        let lines = version_lines(
            &[("Version", Some("0.1.0")), ("Commit", Some("")), ("Date", None)],
            true,
        );
        assert_eq!(lines, [format!("{:<20} 0.1.0", "Version")]);
    }

    #[test]
    fn short_output_is_plain() {
        let lines = version_lines(
            &[("Version", Some("0.1.0")), ("Commit", Some("3f2c1ab"))],
            true,
        );
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| !l.contains('\u{1b}')));
        assert_eq!(lines[1].split_whitespace().collect::<Vec<_>>(), ["Commit", "3f2c1ab"]);
    }

    #[test]
    fn long_output_labels_sections() {
        let lines = version_lines(&[("Version", Some("0.1.0"))], false);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Version:"));
        assert!(lines[0].ends_with(" 0.1.0"));
    }
}

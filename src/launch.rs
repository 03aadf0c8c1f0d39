use std::path::PathBuf;

use crate::layout::LayoutMode;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    pub config: Option<PathBuf>,
    pub layout: Option<LayoutMode>,
    pub analysis: Option<PathBuf>,
    pub paths: Vec<PathBuf>,
}

impl LaunchRequest {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parses `[--config <path>] [--layout 1x1|1x2|2x2] [--analysis <json>] [--open] <paths...>`.
/// Everything after `--open` (or `--`) is a path.
pub fn parse_launch_request_from_args(args: &[String]) -> Result<LaunchRequest, String> {
    let mut request = LaunchRequest::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                request.config = Some(PathBuf::from(option_value(&mut iter, "--config")?));
            }
            "--layout" => {
                let value = option_value(&mut iter, "--layout")?;
                let layout = LayoutMode::parse(value).ok_or_else(|| {
                    format!("Unknown layout '{value}' (expected 1x1, 1x2 or 2x2).")
                })?;
                request.layout = Some(layout);
            }
            "--analysis" => {
                request.analysis = Some(PathBuf::from(option_value(&mut iter, "--analysis")?));
            }
            "--open" | "--" => {
                let rest: Vec<PathBuf> = iter.by_ref().map(PathBuf::from).collect();
                if rest.is_empty() && arg == "--open" {
                    return Err("Missing file path(s) after --open.".to_string());
                }
                request.paths.extend(rest);
            }
            flag if flag.starts_with("--") => {
                return Err(format!("Unknown option {flag}."));
            }
            path => request.paths.push(PathBuf::from(path)),
        }
    }

    Ok(request)
}

fn option_value<'a>(
    iter: &mut impl Iterator<Item = &'a String>,
    flag: &str,
) -> Result<&'a str, String> {
    iter.next()
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty() && !value.starts_with("--"))
        .ok_or_else(|| format!("Missing value after {flag}."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parse_empty_args() {
        let request = parse_launch_request_from_args(&[]).expect("empty args parse");
        assert!(request.is_empty());
    }

    #[test]
    fn parse_cli_falls_back_to_raw_paths() {
        let request =
            parse_launch_request_from_args(&args(&["a.dcm", "b.dcm"])).expect("paths parse");
        assert_eq!(
            request.paths,
            vec![PathBuf::from("a.dcm"), PathBuf::from("b.dcm")]
        );
        assert_eq!(request.layout, None);
    }

    #[test]
    fn parse_all_options() {
        let request = parse_launch_request_from_args(&args(&[
            "--config",
            "viewer.toml",
            "--layout",
            "2x2",
            "--analysis",
            "result.json",
            "--open",
            "--weird-name.dcm",
            "b.dcm",
        ]))
        .expect("options parse");
        assert_eq!(request.config, Some(PathBuf::from("viewer.toml")));
        assert_eq!(request.layout, Some(LayoutMode::Grid2x2));
        assert_eq!(request.analysis, Some(PathBuf::from("result.json")));
        assert_eq!(
            request.paths,
            vec![PathBuf::from("--weird-name.dcm"), PathBuf::from("b.dcm")]
        );
    }

    #[test]
    fn open_requires_paths() {
        let err = parse_launch_request_from_args(&args(&["--open"])).expect_err("no paths");
        assert!(err.contains("--open"));
    }

    #[test]
    fn option_values_are_required() {
        let err = parse_launch_request_from_args(&args(&["--config", "--layout", "1x2"]))
            .expect_err("config value missing");
        assert!(err.contains("--config"), "{err}");
        let err =
            parse_launch_request_from_args(&args(&["--layout", "3x3"])).expect_err("bad layout");
        assert!(err.contains("3x3"), "{err}");
    }

    #[test]
    fn unknown_flags_are_errors() {
        let err = parse_launch_request_from_args(&args(&["--fullscreen", "a.dcm"]))
            .expect_err("unknown flag");
        assert!(err.contains("--fullscreen"));
    }
}

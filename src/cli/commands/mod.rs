use clap::{
    Arg, ColorChoice, Command,
    builder::{
        ValueParser,
        styling::{AnsiColor, Effects, Styles},
    },
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("gardo")
        .about("Access Control Enforcement")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("GARDO_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("window-ms")
                .long("window-ms")
                .help("Rate limit window in milliseconds")
                .default_value("60000")
                .env("GARDO_WINDOW_MS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("max-requests")
                .long("max-requests")
                .help("Requests admitted per key per window (0 rejects everything)")
                .default_value("100")
                .env("GARDO_MAX_REQUESTS")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("max-sessions")
                .long("max-sessions")
                .help("Maximum concurrent sessions per user")
                .default_value("5")
                .env("GARDO_MAX_SESSIONS")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session lifetime in seconds")
                .default_value("43200")
                .env("GARDO_SESSION_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("mfa-window-seconds")
                .long("mfa-window-seconds")
                .help("Trailing window for MFA failure counting, in seconds")
                .default_value("900")
                .env("GARDO_MFA_WINDOW_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("mfa-max-failures")
                .long("mfa-max-failures")
                .help("Failed MFA attempts tolerated inside the window")
                .default_value("5")
                .env("GARDO_MFA_MAX_FAILURES")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("sweep-interval-seconds")
                .long("sweep-interval-seconds")
                .help("Cadence of the expired-entry sweep")
                .default_value("60")
                .env("GARDO_SWEEP_INTERVAL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("GARDO_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "gardo");
        assert_eq!(
            command.get_about().unwrap().to_string(),
            "Access Control Enforcement"
        );
        assert_eq!(
            command.get_version().unwrap().to_string(),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_defaults() {
        let command = new();
        let matches = command.get_matches_from(vec!["gardo"]);

        assert_eq!(matches.get_one::<u16>("port").copied(), Some(8080));
        assert_eq!(matches.get_one::<u64>("window-ms").copied(), Some(60000));
        assert_eq!(matches.get_one::<u32>("max-requests").copied(), Some(100));
        assert_eq!(matches.get_one::<u32>("max-sessions").copied(), Some(5));
        assert_eq!(
            matches.get_one::<u64>("session-ttl-seconds").copied(),
            Some(43200)
        );
        assert_eq!(
            matches.get_one::<u64>("mfa-window-seconds").copied(),
            Some(900)
        );
        assert_eq!(matches.get_one::<u32>("mfa-max-failures").copied(), Some(5));
        assert_eq!(
            matches.get_one::<u64>("sweep-interval-seconds").copied(),
            Some(60)
        );
    }

    #[test]
    fn test_check_flags() {
        let command = new();
        let matches = command.get_matches_from(vec![
            "gardo",
            "--port",
            "9090",
            "--window-ms",
            "1000",
            "--max-requests",
            "3",
            "--max-sessions",
            "2",
        ]);

        assert_eq!(matches.get_one::<u16>("port").copied(), Some(9090));
        assert_eq!(matches.get_one::<u64>("window-ms").copied(), Some(1000));
        assert_eq!(matches.get_one::<u32>("max-requests").copied(), Some(3));
        assert_eq!(matches.get_one::<u32>("max-sessions").copied(), Some(2));
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("GARDO_PORT", Some("443")),
                ("GARDO_WINDOW_MS", Some("30000")),
                ("GARDO_MAX_REQUESTS", Some("50")),
                ("GARDO_LOG_LEVEL", Some("info")),
            ],
            || {
                let command = new();
                let matches = command.get_matches_from(vec!["gardo"]);
                assert_eq!(matches.get_one::<u16>("port").copied(), Some(443));
                assert_eq!(matches.get_one::<u64>("window-ms").copied(), Some(30000));
                assert_eq!(matches.get_one::<u32>("max-requests").copied(), Some(50));
                assert_eq!(matches.get_one::<u8>("verbosity").copied(), Some(2));
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        // loop cover all possible value_parse
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars([("GARDO_LOG_LEVEL", Some(level))], || {
                let command = new();
                let matches = command.get_matches_from(vec!["gardo"]);
                assert_eq!(
                    matches.get_one::<u8>("verbosity").copied(),
                    Some(index as u8)
                );
            });
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        // loop cover all possible value_parse
        let levels = vec!["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("GARDO_LOG_LEVEL", None::<String>)], || {
                let mut args = vec!["gardo".to_string()];

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    let v = format!("-{}", "v".repeat(index));
                    args.push(v);
                }

                let command = new();

                let matches = command.get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>("verbosity").copied(),
                    Some(index as u8)
                );
            });
        }
    }
}

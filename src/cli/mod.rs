pub mod actions;
pub mod config;

use clap::{Arg, ArgAction, ArgMatches, Command};

fn command() -> Command {
    Command::new("emsbus")
        .about("EMS bus participant: discovers boilers and thermostats, reads and writes telegrams")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file (TOML or JSON)")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port of the bus adapter")
                .value_name("PORT"),
        )
        .arg(
            Arg::new("baud-rate")
                .long("baud")
                .help("Serial port baud rate")
                .value_name("BAUD")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("protocol")
                .long("protocol")
                .help("Bus framing: ems or irt")
                .value_name("PROTOCOL"),
        )
        .arg(
            Arg::new("listen-only")
                .long("listen-only")
                .help("Never transmit, only follow the traffic")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("watch")
                .long("watch")
                .short('w')
                .help("Log every telegram of this type at info level")
                .value_name("TYPE"),
        )
        .arg(
            Arg::new("read")
                .long("read")
                .short('r')
                .help("Queue a read once running, e.g. 0x18:0x08 (repeatable)")
                .value_name("TYPE:DEST")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("raw")
                .long("raw")
                .help("Queue a raw telegram given as hex, checksum excluded (repeatable)")
                .value_name("HEX")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Output results in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-devices")
                .long("list-devices")
                .help("List the known boiler and thermostat models and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("checksum")
                .long("checksum")
                .help("Print the checksum of a hex telegram and exit")
                .value_name("HEX")
                .conflicts_with_all(["list-ports", "list-devices", "replay"]),
        )
        .arg(
            Arg::new("replay")
                .long("replay")
                .help("Feed a file of hex frames through the engine and print the outcome")
                .value_name("FILE")
                .conflicts_with_all(["list-ports", "list-devices"]),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeatable_requests() {
        let matches = command()
            .try_get_matches_from([
                "emsbus", "--port", "/dev/ttyUSB0", "--read", "0x18:0x08", "--read", "0x91:0x17",
                "--raw", "0B 08 1D 00 5A",
            ])
            .unwrap();
        let reads: Vec<_> = matches
            .get_many::<String>("read")
            .unwrap()
            .map(String::as_str)
            .collect();
        assert_eq!(reads, vec!["0x18:0x08", "0x91:0x17"]);
        assert_eq!(
            matches.get_one::<String>("port").map(String::as_str),
            Some("/dev/ttyUSB0")
        );
    }

    #[test]
    fn test_one_shot_modes_conflict() {
        let result = command().try_get_matches_from([
            "emsbus",
            "--checksum",
            "0B 88 02 00",
            "--list-ports",
        ]);
        assert!(result.is_err());
    }
}

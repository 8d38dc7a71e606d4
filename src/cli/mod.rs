pub mod actions;

use clap::{Arg, ArgAction, ArgMatches, Command};

fn slot_arg() -> Arg {
    Arg::new("slot")
        .help("Slot number (1-9)")
        .value_name("SLOT")
        .required(true)
        .value_parser(clap::value_parser!(i64))
}

fn flag_value(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .value_name("BOOL")
        .value_parser(clap::value_parser!(bool))
}

/// Build the command line definition.
pub fn build_command() -> Command {
    Command::new("scopeslot")
        .about("Manage telescope connection slots")
        .subcommand_required(true)
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .short('d')
                .help("Directory holding telescopes.json, device_models.json and settings.toml")
                .value_name("DIR")
                .global(true),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Output listings in JSON format")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("list").about("Show configured slots"))
        .subcommand(Command::new("models").about("Show available device models"))
        .subcommand(Command::new("ports").about("Show available serial ports"))
        .subcommand(
            Command::new("add")
                .about("Configure a slot, replacing any previous configuration")
                .arg(slot_arg())
                .arg(
                    Arg::new("name")
                        .long("name")
                        .short('n')
                        .help("Display name of the telescope")
                        .value_name("NAME")
                        .required(true),
                )
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .short('k')
                        .help("Connection kind: virtual, internal, local or remote")
                        .value_name("KIND")
                        .required(true),
                )
                .arg(
                    Arg::new("equinox")
                        .long("equinox")
                        .help("J2000 or JNow")
                        .value_name("EQUINOX")
                        .default_value("J2000"),
                )
                .arg(
                    Arg::new("host")
                        .long("host")
                        .help("Host name of a remote telescope server")
                        .value_name("HOST"),
                )
                .arg(
                    Arg::new("tcp-port")
                        .long("tcp-port")
                        .help("TCP port (defaults to 10000 + slot)")
                        .value_name("PORT")
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    Arg::new("delay")
                        .long("delay")
                        .help("Delay between communication attempts, in microseconds")
                        .value_name("MICROS")
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    Arg::new("device-model")
                        .long("device-model")
                        .help("Device model name, see `scopeslot models`")
                        .value_name("MODEL"),
                )
                .arg(
                    Arg::new("serial-port")
                        .long("serial-port")
                        .help("Serial port of an internal connection")
                        .value_name("PORT"),
                )
                .arg(
                    Arg::new("circle")
                        .long("circle")
                        .help("Field of view circle radius in degrees (repeatable)")
                        .value_name("DEGREES")
                        .action(ArgAction::Append)
                        .value_parser(clap::value_parser!(f64)),
                )
                .arg(
                    Arg::new("autostart")
                        .long("autostart")
                        .help("Connect when `scopeslot run` starts")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Delete the configuration of a slot")
                .arg(slot_arg()),
        )
        .subcommand(
            Command::new("config")
                .about("Show or change settings")
                .arg(flag_value(
                    "use-server-executables",
                    "Prefer external TelescopeServer executables",
                ))
                .arg(
                    Arg::new("server-dir")
                        .long("server-dir")
                        .help("Directory holding TelescopeServer executables")
                        .value_name("DIR"),
                )
                .arg(flag_value("use-server-logs", "Write per-slot communication logs"))
                .arg(
                    Arg::new("tick-interval")
                        .long("tick-interval")
                        .help("Communication tick interval in milliseconds")
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Start autostart slots and drive them until Ctrl-C")
                .arg(
                    Arg::new("start")
                        .long("start")
                        .short('s')
                        .help("Also start this slot (repeatable)")
                        .value_name("SLOT")
                        .action(ArgAction::Append)
                        .value_parser(clap::value_parser!(i64)),
                ),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        build_command().debug_assert();
    }

    #[test]
    fn add_collects_circles() {
        let matches = build_command()
            .try_get_matches_from([
                "scopeslot", "add", "3", "--name", "Sim", "--kind", "virtual", "--circle", "0.5",
                "--circle", "1.5",
            ])
            .unwrap();
        let (_, add) = matches.subcommand().unwrap();
        let circles: Vec<f64> = add.get_many::<f64>("circle").unwrap().copied().collect();
        assert_eq!(circles, vec![0.5, 1.5]);
        assert_eq!(add.get_one::<i64>("slot"), Some(&3));
    }
}

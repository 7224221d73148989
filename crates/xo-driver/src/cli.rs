use std::collections::HashMap;
use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, Args, Command, FromArgMatches, Parser, Subcommand};
use xo_machine::{Flag, FlagKind, create_flags};

/// Provision and manage Xen Orchestra VMs as machines.
#[derive(Parser, Debug)]
#[command(name = "xo-driver")]
#[command(version)]
pub struct Cli {
    /// Directory holding machine records and keys.
    #[arg(
        long,
        global = true,
        env = "XO_MACHINE_STORAGE_PATH",
        default_value = ".xo-machine"
    )]
    pub storage_path: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a VM from a template and wait for its address.
    Create(CreateArgs),

    /// Boot a stopped machine.
    Start(MachineArg),

    /// Shut a machine down cleanly.
    Stop(MachineArg),

    /// Power a machine off immediately.
    Kill(MachineArg),

    /// Restart a machine.
    Restart(MachineArg),

    /// Delete the VM and the local record.
    #[command(alias = "remove")]
    Rm(MachineArg),

    /// Print the machine's power state.
    Status(MachineArg),

    /// Print the Docker engine URL.
    Url(MachineArg),

    /// Print the machine's IP address.
    Ip(MachineArg),

    /// Print the host to SSH into.
    SshHostname(MachineArg),

    /// List known machines.
    #[command(alias = "list")]
    Ls,

    /// Describe the options accepted by `create`.
    Flags,
}

#[derive(Args, Debug)]
pub struct MachineArg {
    /// Machine name.
    pub name: String,
}

/// `create` arguments. The option set comes from the driver's flag table, so
/// values are collected by flag name rather than into fixed fields.
#[derive(Debug, Clone)]
pub struct CreateArgs {
    pub name: String,
    pub options: HashMap<String, String>,
}

fn flag_arg(flag: &Flag) -> Arg {
    let arg = Arg::new(flag.name)
        .long(flag.name)
        .env(flag.env_var)
        .hide_env_values(true)
        .help(flag.usage);

    match flag.kind {
        FlagKind::Bool => arg
            .action(ArgAction::SetTrue)
            .value_parser(BoolishValueParser::new()),
        FlagKind::Int { default } => arg
            .value_name("N")
            .help(format!("{} [default: {default}]", flag.usage)),
        FlagKind::String => arg.value_name("VALUE"),
    }
}

impl Args for CreateArgs {
    fn augment_args(cmd: Command) -> Command {
        let cmd = cmd.arg(Arg::new("name").required(true).help("Machine name"));
        create_flags()
            .iter()
            .fold(cmd, |cmd, flag| cmd.arg(flag_arg(flag)))
    }

    fn augment_args_for_update(cmd: Command) -> Command {
        Self::augment_args(cmd)
    }
}

impl FromArgMatches for CreateArgs {
    fn from_arg_matches(matches: &ArgMatches) -> Result<Self, clap::Error> {
        let name = matches
            .get_one::<String>("name")
            .cloned()
            .ok_or_else(|| {
                clap::Error::raw(ErrorKind::MissingRequiredArgument, "machine name is required")
            })?;

        let mut options = HashMap::new();
        for flag in create_flags() {
            match flag.kind {
                FlagKind::Bool => {
                    if matches.get_flag(flag.name) {
                        options.insert(flag.name.to_string(), "true".to_string());
                    }
                }
                FlagKind::String | FlagKind::Int { .. } => {
                    if let Some(value) = matches.get_one::<String>(flag.name) {
                        options.insert(flag.name.to_string(), value.clone());
                    }
                }
            }
        }

        Ok(Self { name, options })
    }

    fn update_from_arg_matches(&mut self, matches: &ArgMatches) -> Result<(), clap::Error> {
        *self = Self::from_arg_matches(matches)?;
        Ok(())
    }
}

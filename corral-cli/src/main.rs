mod commands;
mod context;
mod executor;
mod response;
mod streamer;

use std::ffi::OsString;
use std::process;

pub const NAME: &str = "corral";

const COMMANDS: &[(&str, &str)] = &[
    ("install", "Install a container on one or more hosts"),
    ("start", "Start one or more containers"),
    ("stop", "Stop one or more containers"),
    ("delete", "Delete one or more containers"),
    ("link", "Record network links between containers"),
    ("log", "Stream the tail of a container's journal"),
    ("content", "Retrieve container content such as the environment"),
    ("build-image", "Run a source-to-image build"),
    ("create-repo", "Create a git repository"),
    ("add-keys", "Grant SSH keys access to containers or repositories"),
    ("purge", "Remove every container a host owns"),
    ("auth-keys", "Generate authorized_keys output for sshd"),
];

fn usage() {
    println!("usage: {NAME} <command> [<args>...]\n");
    println!("Commands:");
    for (name, summary) in COMMANDS {
        println!("  {name:<12} {summary}");
    }
    println!("\nTargets are '[<host>[:<port>]/]<identifier>'; no host means local.");
}

fn run(command: &str, args: Vec<OsString>) -> anyhow::Result<i32> {
    match command {
        "install" => commands::install::run(args),
        "start" => commands::start::run(args),
        "stop" => commands::stop::run(args),
        "delete" => commands::delete::run(args),
        "link" => commands::link::run(args),
        "log" => commands::log_tail::run(args),
        "content" => commands::content::run(args),
        "build-image" => commands::build::run(args),
        "create-repo" => commands::repo::run(args),
        "add-keys" => commands::keys::run(args),
        "purge" => commands::purge::run(args),
        "auth-keys" => commands::authkeys::run(args),
        "help" | "--help" | "-h" => {
            usage();
            Ok(0)
        }
        other => {
            usage();
            anyhow::bail!("unknown command '{other}'")
        }
    }
}

fn main() {
    env_logger::init();

    let mut args: Vec<OsString> = std::env::args_os().skip(1).collect();
    if args.is_empty() {
        usage();
        process::exit(1);
    }
    let command = args.remove(0);

    match run(command.to_string_lossy().as_ref(), args) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{NAME}: {err}");
            process::exit(1);
        }
    }
}

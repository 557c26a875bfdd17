use std::ffi::OsString;
use std::io::Write as _;

use anyhow::anyhow;

use corral::job::JobError;

use crate::context::context;

use super::CommonOptions;

pub const USAGE: &str = "corral auth-keys <username>";

/// Generate `authorized_keys` output for sshd's AuthorizedKeysCommand. Runs
/// locally only.
pub fn run(args: Vec<OsString>) -> anyhow::Result<i32> {
    let options = CommonOptions::from_args(args)?;
    let [user] = options.values.as_slice() else {
        return Err(anyhow!("usage: {USAGE}"));
    };

    let ctx = context(&options.transport)?;
    let mut stdout = std::io::stdout();
    match ctx.handlers.generate_authorized_keys(user, &mut stdout) {
        Ok(()) => {
            stdout.flush()?;
            Ok(0)
        }
        Err(JobError::NotFound(_)) => {
            eprintln!("unable to look up the user '{user}'");
            Ok(2)
        }
        Err(e) => {
            eprintln!("unable to generate the authorized_keys file: {e}");
            Ok(1)
        }
    }
}

//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Carrot.
//
// Carrot is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Carrot is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Carrot. If not, see <http://www.gnu.org/licenses/>.

use std::path::{Path, PathBuf};

use structopt::StructOpt;
use toml::Value;

use crate::support::sysexits::*;
use crate::support::system_config::{CarrotConfig, SystemConfig};

/// A small mail server speaking SMTP and POP3.
///
/// Configuration is read from `carrot.toml` in the current directory (or the
/// file given with `--config`), then from `carrot.toml` in the data
/// directory. Command-line options override both.
#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Options {
    /// Read configuration from this file instead of `./carrot.toml`.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// The host name the server calls itself.
    #[structopt(long)]
    host: Option<String>,

    /// The directory holding the maildrops and further configuration.
    #[structopt(long, parse(from_os_str))]
    data: Option<PathBuf>,

    /// Log debug messages.
    #[structopt(long)]
    debug: bool,

    /// Override one configuration option, e.g. `-D smtp.port=2525`. Can be
    /// passed multiple times.
    #[structopt(short = "D", number_of_values(1))]
    define: Vec<String>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Run the configured protocol servers until interrupted.
    Serve,
    Restore(RestoreSubcommand),
}

/// Move mail deleted over POP3 back out of the trash.
///
/// Do not run this while a POP3 session might be using the maildrops.
#[derive(StructOpt)]
pub(super) struct RestoreSubcommand {
    /// The users whose trash to restore [default: every configured user]
    pub(super) users: Vec<String>,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let matches = match Options::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    };
    let options = Options::from_clap(&matches);

    let config = load_config(&options);
    let carrot = match config.carrot() {
        Ok(carrot) => carrot,
        Err(e) => {
            eprintln!("{}", e);
            EX_CONFIG.exit()
        }
    };

    init_logging(&carrot);

    match options.command {
        Command::Serve => super::serve::serve(config, carrot),
        Command::Restore(cmd) => super::restore::restore(config, carrot, cmd),
    }
}

fn load_config(options: &Options) -> SystemConfig {
    let mut config = SystemConfig::default();

    let config_file = options
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("carrot.toml"));
    match config.merge_file(&config_file) {
        Ok(true) => (),
        Ok(false) if options.config.is_none() => (),
        Ok(false) => {
            eprintln!("'{}' does not exist", config_file.display());
            EX_CONFIG.exit()
        }
        Err(e) => {
            eprintln!("Error in '{}': {}", config_file.display(), e);
            EX_CONFIG.exit()
        }
    }

    if let Some(ref data) = options.data {
        config.set("carrot", "data", path_value(data));
    }

    let data = match config.get_str("carrot", "data") {
        Some(data) => PathBuf::from(data),
        None => {
            eprintln!("No data directory configured");
            EX_CONFIG.exit()
        }
    };
    let data_config_file = data.join("carrot.toml");
    if let Err(e) = config.merge_file(&data_config_file) {
        eprintln!("Error in '{}': {}", data_config_file.display(), e);
        EX_CONFIG.exit()
    }

    // Flags win over both files
    if let Some(ref data) = options.data {
        config.set("carrot", "data", path_value(data));
    }
    if let Some(ref host) = options.host {
        config.set("carrot", "host", Value::String(host.clone()));
    }
    if options.debug {
        config.set("carrot", "debug", Value::Boolean(true));
    }

    for define in &options.define {
        if let Err(e) = config.set_override(define) {
            eprintln!("-D {}: {}", define, e);
            EX_USAGE.exit()
        }
    }

    config
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

fn init_logging(carrot: &CarrotConfig) {
    let level = if carrot.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let log_config_file = carrot.data.join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            eprintln!(
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
            EX_CONFIG.exit()
        }
    } else if carrot.syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        let result = syslog::unix(formatter)
            .map_err(|e| e.to_string())
            .and_then(|logger| {
                log::set_boxed_logger(Box::new(syslog::BasicLogger::new(
                    logger,
                )))
                .map_err(|e| e.to_string())
            });
        match result {
            Ok(()) => log::set_max_level(level),
            Err(e) => {
                eprintln!("Failed to connect to syslog: {}", e);
                EX_OSERR.exit()
            }
        }
    } else if let Err(e) = crate::init_simple_log(level) {
        eprintln!("Failed to initialise logging: {}", e);
        EX_SOFTWARE.exit()
    }
}

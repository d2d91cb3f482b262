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

use log::{info, warn};

use super::main::RestoreSubcommand;
use crate::maildrop::MaildropFactory;
use crate::support::sysexits::*;
use crate::support::system_config::{CarrotConfig, SystemConfig};

pub(super) fn restore(
    config: SystemConfig,
    carrot: CarrotConfig,
    cmd: RestoreSubcommand,
) {
    let users = if cmd.users.is_empty() {
        config.user_names()
    } else {
        cmd.users
    };

    for user in &users {
        if !config.has_user(user) {
            warn!("'{}' is not a configured user", user);
        }
    }

    let maildrops = MaildropFactory::from_config(&carrot);
    match maildrops.restore_trash(users.iter().map(String::as_str)) {
        Ok(restored) => {
            info!("Restored {} message(s) from trash", restored);
            println!("Restored {} message(s)", restored);
        }
        Err(e) => {
            eprintln!("Failed to restore trash: {}", e);
            EX_IOERR.exit()
        }
    }
}

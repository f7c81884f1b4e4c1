pub mod browse;
pub mod check;
pub mod config;
pub mod export;
pub mod install;
pub mod publish;
pub mod update;

pub use browse::{handle_browse_command, handle_info_command, handle_search_command};
pub use check::{handle_scan_command, handle_validate_command};
pub use config::handle_config_command;
pub use export::handle_export_command;
pub use install::{
    handle_install_command, handle_list_command, handle_uninstall_command, handle_verify_command,
};
pub use publish::handle_publish_command;
pub use update::{handle_outdated_command, handle_update_all_command, handle_update_command};

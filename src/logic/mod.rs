//! Logic modules: translate request choices into concrete actions.
//!
//! # Modules
//!
//! - `resolver` - bootstrap package set resolution
//! - `preinstall` - live-system preparation before pacstrap (multilib)
//! - `setup_script` - the chroot configuration script
//! - `bootloader` - GRUB install, theme, defaults and boot order

pub mod bootloader;
pub mod preinstall;
pub mod resolver;
pub mod setup_script;

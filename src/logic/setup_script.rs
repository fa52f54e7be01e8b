//! System Configuration Script Builder
//!
//! Renders the one-shot shell script that runs inside the new root via
//! `arch-chroot`. It sets the clock, locale, hostname and keyboard, rebuilds
//! the initramfs, creates the primary user and enables services.
//!
//! Values are interpolated directly. Request validation guarantees that
//! every value except the password is a single shell-safe token; the
//! password and the user-facing names are still single-quoted.

use crate::request::InstallRequest;
use std::fmt::Write;

/// Supplementary groups of the primary user
pub const USER_GROUPS: &str = "wheel,audio,video,storage,optical";

/// Inputs of the setup script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupScript {
    pub timezone: String,
    pub locale: String,
    pub hostname: String,
    pub keymap: String,
    pub username: String,
    pub password: String,
    pub shell: String,
    pub services: Vec<String>,
}

impl SetupScript {
    pub fn from_request(request: &InstallRequest) -> Self {
        Self {
            timezone: request.timezone.clone(),
            locale: request.locale.clone(),
            hostname: request.hostname.clone(),
            keymap: request.keymap.clone(),
            username: request.username.clone(),
            password: request.password.clone(),
            shell: request.shell.clone(),
            services: request.services.clone(),
        }
    }

    /// Same script with the password replaced, for display.
    pub fn masked(&self) -> Self {
        Self {
            password: "********".to_string(),
            ..self.clone()
        }
    }

    /// Produce the script text.
    pub fn render(&self) -> String {
        let mut s = String::with_capacity(2048);
        let hostname = &self.hostname;

        s.push_str("#!/bin/bash\nset -e\n");

        // clock
        let _ = writeln!(s, "ln -sf /usr/share/zoneinfo/{} /etc/localtime", self.timezone);
        s.push_str("hwclock --systohc\n");

        // locale
        let _ = writeln!(s, "echo \"{} UTF-8\" >> /etc/locale.gen", self.locale);
        s.push_str("locale-gen\n");
        let _ = writeln!(s, "echo \"LANG={}\" > /etc/locale.conf", self.locale);
        s.push_str(
            "sed -i '/^#\\[multilib\\]/{N;s/#\\[multilib\\]\\n#Include/[multilib]\\nInclude/}' /etc/pacman.conf || true\n",
        );

        // identity
        let _ = writeln!(s, "echo \"{}\" > /etc/hostname", hostname);
        s.push_str("cat > /etc/hosts << 'EOF'\n");
        s.push_str("127.0.0.1   localhost\n");
        s.push_str("::1         localhost\n");
        let _ = writeln!(s, "127.0.1.1   {}.localdomain {}", hostname, hostname);
        s.push_str("EOF\n");

        // keyboard
        let _ = writeln!(s, "echo \"KEYMAP={}\" > /etc/vconsole.conf", self.keymap);
        s.push_str("mkdir -p /etc/X11/xorg.conf.d\n");
        s.push_str("cat > /etc/X11/xorg.conf.d/00-keyboard.conf << 'KBEOF'\n");
        s.push_str("Section \"InputClass\"\n");
        s.push_str("    Identifier \"system-keyboard\"\n");
        s.push_str("    MatchIsKeyboard \"on\"\n");
        let _ = writeln!(s, "    Option \"XkbLayout\" \"{}\"", self.keymap);
        s.push_str("EndSection\nKBEOF\n");

        s.push_str("mkinitcpio -P || echo \"mkinitcpio finished with warnings\"\n");

        // accounts
        s.push_str("passwd -l root\n");
        let _ = writeln!(
            s,
            "useradd -m -G {} -s {} {}",
            USER_GROUPS,
            shell_quote(&self.shell),
            shell_quote(&self.username)
        );
        let _ = writeln!(
            s,
            "printf '%s\\n' {} | chpasswd",
            shell_quote(&format!("{}:{}", self.username, self.password))
        );
        s.push_str("echo \"%wheel ALL=(ALL:ALL) ALL\" > /etc/sudoers.d/wheel\n");
        s.push_str("chmod 440 /etc/sudoers.d/wheel\n");

        // services
        s.push_str("systemctl enable NetworkManager.service || echo \"WARNING: NM enable failed\"\n");
        s.push_str("systemctl enable systemd-resolved.service 2>/dev/null || true\n");
        s.push_str("systemctl enable iwd.service 2>/dev/null || true\n");
        if !self.services.is_empty() {
            let quoted: Vec<String> = self.services.iter().map(|svc| shell_quote(svc)).collect();
            let _ = writeln!(s, "for svc in {}; do", quoted.join(" "));
            s.push_str("    systemctl enable \"$svc\" 2>/dev/null || echo \"Note: $svc not enabled\"\n");
            s.push_str("done\n");
        }

        s
    }
}

/// Wrap `value` in single quotes, escaping embedded single quotes.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

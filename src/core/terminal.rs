use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static PLUG: Emoji<'_, '_> = Emoji("🔌 ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_event(account: &str, state: &str, pid: u32) {
    if pid == 0 {
        println!("  {} {} {}", PLUG, style(account).bold(), style(state).dim());
    } else {
        println!(
            "  {} {} {} {}",
            PLUG,
            style(account).bold(),
            style(state).dim(),
            style(format!("pid {}", pid)).dim()
        );
    }
}

pub fn print_banner() {
    println!();
    println!(
        "{} {}",
        style("relog").bold().cyan(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );
    println!("{}\n", style("Keeps your characters logged in.").cyan());
}

/// Titled block of aligned help or status lines.
pub struct GuideSection {
    title: String,
    lines: Vec<String>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, about: &str) -> Self {
        self.lines
            .push(format!("  {:<28} {}", style(name).green(), about));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(format!("  {}: {}", style(label).bold().cyan(), value));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(format!("  {}", text));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn print(&self) {
        println!("\n {}", style(&self.title).bold().underlined());
        for line in &self.lines {
            println!("{}", line);
        }
    }
}

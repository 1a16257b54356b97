use clap::ValueEnum;
use std::io::IsTerminal;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressMode {
    /// Draw bars only when stderr is a terminal
    Auto,
    Always,
    Never,
}

impl ProgressMode {
    pub fn should_draw(self) -> bool {
        match self {
            ProgressMode::Auto => std::io::stderr().is_terminal(),
            ProgressMode::Always => true,
            ProgressMode::Never => false,
        }
    }
}

/// Whether the host app is visible to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppLifecycle {
    #[default]
    Foreground,
    Background,
}

impl AppLifecycle {
    pub const fn is_foreground(self) -> bool {
        matches!(self, Self::Foreground)
    }
}

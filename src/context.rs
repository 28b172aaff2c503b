//! Local participant context
//!
//! Constructed once by the application and handed to each session, so
//! several independent sessions can coexist (notably under test).

/// Profile of the local participant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    display_name: String,
    initials: String,
}

impl CallContext {
    pub fn new(display_name: impl Into<String>) -> Self {
        let mut ctx = Self::default();
        ctx.set_display_name(display_name);
        ctx
    }

    /// Replace the display name and recompute the initials
    pub fn set_display_name(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
        self.initials = initials_of(&self.display_name);
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Up to two upper-case initials, or `??` when the name is blank
    pub fn initials(&self) -> &str {
        &self.initials
    }
}

fn initials_of(name: &str) -> String {
    let initials: String = name
        .split_whitespace()
        .take(2)
        .filter_map(|part| part.chars().next())
        .flat_map(char::to_uppercase)
        .collect();

    if initials.is_empty() {
        "??".to_string()
    } else {
        initials
    }
}

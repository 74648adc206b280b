use crate::domain::UserId;

/// Slash command: `/name[@bot] args`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Command<'a> {
    pub name: String,
    pub args: &'a str,
}

impl<'a> Command<'a> {
    pub fn parse(text: &'a str) -> Option<Self> {
        let rest = text.trim_start().strip_prefix('/')?;
        let (head, args) = match rest.find(char::is_whitespace) {
            Some(i) => (&rest[..i], rest[i..].trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head);
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_lowercase(),
            args,
        })
    }

    /// `<user_id> [free text]`, as used by the moderation commands.
    pub fn target_and_rest(&self) -> Option<(UserId, &'a str)> {
        let args = self.args;
        let (id, rest) = match args.find(char::is_whitespace) {
            Some(i) => (&args[..i], args[i..].trim()),
            None => (args, ""),
        };
        id.parse::<i64>().ok().map(|id| (UserId(id), rest))
    }
}

//! Prefixed text commands and their routing onto the ledger.
//!
//! ```text
//! -link <alias> <member> [role]
//! -balance [member]
//! -top
//! -credit <member> <amount>
//! -debit <member> <amount>
//! -setbalance <member> <value>
//! ```
//!
//! Members are platform ids or mentions (`<@123>`). Results are returned as
//! structured values; rendering is left to the chat front end.

use crate::error::LedgerError;
use crate::models::{Account, Identity};
use crate::services::{BalanceView, Caller, Ledger, LinkOutcome, Operation};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Link {
        alias: String,
        target: Identity,
        role: Option<String>,
    },
    Balance {
        target: Option<Identity>,
    },
    Top,
    Credit {
        target: Identity,
        amount: i64,
    },
    Debit {
        target: Identity,
        amount: i64,
    },
    SetBalance {
        target: Identity,
        value: i64,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Link { .. } => "link",
            Command::Balance { .. } => "balance",
            Command::Top => "top",
            Command::Credit { .. } => "credit",
            Command::Debit { .. } => "debit",
            Command::SetBalance { .. } => "setbalance",
        }
    }
}

/// Splits a line into a typed [`Command`].
#[derive(Debug, Clone)]
pub struct CommandParser {
    prefixes: Vec<String>,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new(["-"])
    }
}

impl CommandParser {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut prefixes: Vec<String> = prefixes
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.is_empty())
            .collect();
        // Longest first so "!!" wins over "!".
        prefixes.sort_by_key(|p| std::cmp::Reverse(p.len()));
        Self { prefixes }
    }

    /// Parse a line. Lines without a configured prefix yield `Ok(None)`.
    pub fn parse(&self, line: &str) -> Result<Option<Command>, LedgerError> {
        self.split(line).map(Invocation::into_command).transpose()
    }

    /// Strip the prefix and tokenize, without validating arguments.
    fn split<'a>(&self, line: &'a str) -> Option<Invocation<'a>> {
        let line = line.trim();
        let body = self
            .prefixes
            .iter()
            .find_map(|prefix| line.strip_prefix(prefix.as_str()))?;

        let mut tokens = body.split_whitespace();
        let name = tokens.next()?.to_ascii_lowercase();
        Some(Invocation {
            name,
            args: tokens.collect(),
        })
    }
}

/// A prefixed line split into a command name and raw arguments.
struct Invocation<'a> {
    name: String,
    args: Vec<&'a str>,
}

impl Invocation<'_> {
    /// Operation the caller must be allowed before any argument is checked.
    /// `None` for unknown commands.
    fn operation(&self, caller: &Caller) -> Option<Operation> {
        let operation = match self.name.as_str() {
            "link" => Operation::Link,
            "balance" => match self.args.as_slice() {
                [member] if member.parse::<Identity>().ok() != Some(caller.identity) => {
                    Operation::ReadOtherBalance
                }
                _ => Operation::ReadOwnBalance,
            },
            "top" => Operation::TopBalances,
            "credit" => Operation::Credit,
            "debit" => Operation::Debit,
            "setbalance" => Operation::SetBalance,
            _ => return None,
        };
        Some(operation)
    }

    fn into_command(self) -> Result<Command, LedgerError> {
        let command = match self.name.as_str() {
            "link" => match self.args.as_slice() {
                [alias, member, role @ ..] => Command::Link {
                    alias: alias.to_string(),
                    target: member.parse()?,
                    role: (!role.is_empty()).then(|| role.join(" ")),
                },
                _ => return Err(usage("link <alias> <member> [role]")),
            },
            "balance" => match self.args.as_slice() {
                [] => Command::Balance { target: None },
                [member] => Command::Balance {
                    target: Some(member.parse()?),
                },
                _ => return Err(usage("balance [member]")),
            },
            "top" => match self.args.as_slice() {
                [] => Command::Top,
                _ => return Err(usage("top")),
            },
            "credit" => match self.args.as_slice() {
                [member, amount] => Command::Credit {
                    target: member.parse()?,
                    amount: parse_integer(amount)?,
                },
                _ => return Err(usage("credit <member> <amount>")),
            },
            "debit" => match self.args.as_slice() {
                [member, amount] => Command::Debit {
                    target: member.parse()?,
                    amount: parse_integer(amount)?,
                },
                _ => return Err(usage("debit <member> <amount>")),
            },
            "setbalance" => match self.args.as_slice() {
                [member, value] => Command::SetBalance {
                    target: member.parse()?,
                    value: parse_integer(value)?,
                },
                _ => return Err(usage("setbalance <member> <value>")),
            },
            other => {
                return Err(LedgerError::InvalidArgument(format!(
                    "unknown command '{}'",
                    other
                )))
            }
        };

        Ok(command)
    }
}

fn usage(syntax: &str) -> LedgerError {
    LedgerError::InvalidArgument(format!("usage: {}", syntax))
}

fn parse_integer(token: &str) -> Result<i64, LedgerError> {
    token.parse::<i64>().map_err(|_| {
        LedgerError::InvalidArgument(format!("expected an integer amount, got '{}'", token))
    })
}

/// Structured result of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Linked(LinkOutcome),
    Balance(BalanceView),
    Top(Vec<Account>),
    Credited(Account),
    Debited(Account),
    BalanceSet(Account),
}

/// Routes parsed commands to the ledger.
#[derive(Clone)]
pub struct Dispatcher {
    parser: CommandParser,
    ledger: Ledger,
}

impl Dispatcher {
    pub fn new(parser: CommandParser, ledger: Ledger) -> Self {
        Self { parser, ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Parse and execute `line` on behalf of `caller`.
    ///
    /// Returns `Ok(None)` for lines that are not commands. Privilege is
    /// checked before arguments, so an unprivileged caller never learns
    /// whether a privileged command was well formed.
    pub async fn dispatch(
        &self,
        caller: &Caller,
        line: &str,
    ) -> Result<Option<CommandOutcome>, LedgerError> {
        let Some(invocation) = self.parser.split(line) else {
            return Ok(None);
        };
        if let Some(operation) = invocation.operation(caller) {
            self.ledger.authorize(caller, operation)?;
        }
        let command = invocation.into_command()?;
        debug!(command = command.name(), caller = %caller.identity, "Dispatching command");
        self.execute(caller, command).await.map(Some)
    }

    pub async fn execute(
        &self,
        caller: &Caller,
        command: Command,
    ) -> Result<CommandOutcome, LedgerError> {
        let outcome = match command {
            Command::Link {
                alias,
                target,
                role,
            } => CommandOutcome::Linked(
                self.ledger
                    .link(caller, target, &alias, role.as_deref())
                    .await?,
            ),
            Command::Balance { target } => {
                CommandOutcome::Balance(self.ledger.get_balance(caller, target).await?)
            }
            Command::Top => CommandOutcome::Top(self.ledger.top_balances(caller).await?),
            Command::Credit { target, amount } => {
                CommandOutcome::Credited(self.ledger.credit(caller, target, amount).await?)
            }
            Command::Debit { target, amount } => {
                CommandOutcome::Debited(self.ledger.debit(caller, target, amount).await?)
            }
            Command::SetBalance { target, value } => {
                CommandOutcome::BalanceSet(self.ledger.set_balance(caller, target, value).await?)
            }
        };
        Ok(outcome)
    }
}

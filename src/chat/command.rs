//! Slash commands.
//!
//! A line is split on whitespace; the first token picks a handler from
//! [`COMMANDS`] case-insensitively. Every handler performs its own side
//! effects and answers with one [`CommandResult`]. Lines naming an unknown
//! command are not commands at all and are posted as ordinary text.

use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use tracing::{info, warn};

use super::fortune;
use super::hub::{Actor, ChatHub, RoomState};
use super::ledger::{require_privileged, IpTarget, Target};
use super::message::ChatMessage;
use super::tier::AdminTier;
use crate::store::ProfileUpdate;
use crate::web::events::ServerEvent;
use crate::{ParlorError, Result};

/// Sender shown on `/omi` results.
pub const OMIKUJI_SENDER: &str = "Omikuji";
/// Sender shown on `/dice` results.
pub const DICE_SENDER: &str = "Dice";
/// Sender shown on `/coin` results.
pub const COIN_SENDER: &str = "Coin";

const OMIKUJI_COLOR: &str = "#c0392b";
const DICE_COLOR: &str = "#2980b9";
const COIN_COLOR: &str = "#b7950b";

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Failure shown to the invoker only.
    Error {
        /// Error text.
        message: String,
    },
    /// System line for the whole room.
    System {
        /// Line text.
        message: String,
    },
    /// System line for the invoker only.
    Private {
        /// Line text.
        message: String,
    },
    /// Two chained room messages: the invoker's line, then the outcome.
    CommandResult {
        /// The invoker's line.
        user_message: String,
        /// Name shown on the outcome line.
        result_sender: String,
        /// Outcome text.
        result_message: String,
        /// Color of the outcome line.
        result_color: String,
    },
}

impl CommandResult {
    fn system(message: impl Into<String>) -> Self {
        CommandResult::System {
            message: message.into(),
        }
    }

    fn private(message: impl Into<String>) -> Self {
        CommandResult::Private {
            message: message.into(),
        }
    }
}

/// Arguments handed to a command handler.
#[derive(Debug)]
pub struct CommandContext<'a> {
    /// Who issued the command.
    pub actor: &'a Actor,
    /// The whole input line.
    pub input: &'a str,
    /// Whitespace-separated tokens after the command name.
    pub args: Vec<&'a str>,
    /// Everything after the command name, trimmed.
    pub rest: &'a str,
}

impl<'a> CommandContext<'a> {
    /// Split an input line into the lowercased command name and its context.
    pub fn parse(actor: &'a Actor, input: &'a str) -> Option<(String, Self)> {
        let input = input.trim();
        let mut tokens = input.split_whitespace();
        let name = tokens.next()?.to_lowercase();
        let args: Vec<&str> = tokens.collect();
        let rest = input
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())
            .unwrap_or("");
        Some((
            name,
            Self {
                actor,
                input,
                args,
                rest,
            },
        ))
    }

    fn arg(&self, index: usize, usage: &str) -> Result<&'a str> {
        self.args
            .get(index)
            .copied()
            .ok_or_else(|| ParlorError::Validation(format!("usage: {usage}")))
    }
}

type Handler =
    for<'a> fn(&'a ChatHub, &'a CommandContext<'a>) -> BoxFuture<'a, Result<CommandResult>>;

/// One entry of the command table.
pub struct CommandSpec {
    /// Name including the leading slash.
    pub name: &'static str,
    /// Usage line for `/help`.
    pub usage: &'static str,
    /// One-line description for `/help`.
    pub description: &'static str,
    /// Minimum tier needed to run it.
    pub tier: AdminTier,
    handler: Handler,
}

/// The command table.
pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "/help",
        usage: "/help",
        description: "show this help",
        tier: AdminTier::Regular,
        handler: cmd_help,
    },
    CommandSpec {
        name: "/prm",
        usage: "/prm <name> <text>",
        description: "send a private message",
        tier: AdminTier::Regular,
        handler: cmd_prm,
    },
    CommandSpec {
        name: "/color",
        usage: "/color <#hex>",
        description: "change your message color",
        tier: AdminTier::Regular,
        handler: cmd_color,
    },
    CommandSpec {
        name: "/omi",
        usage: "/omi",
        description: "draw a fortune",
        tier: AdminTier::Regular,
        handler: cmd_omi,
    },
    CommandSpec {
        name: "/dice",
        usage: "/dice",
        description: "roll a six-sided die",
        tier: AdminTier::Regular,
        handler: cmd_dice,
    },
    CommandSpec {
        name: "/coin",
        usage: "/coin",
        description: "flip a coin",
        tier: AdminTier::Regular,
        handler: cmd_coin,
    },
    CommandSpec {
        name: "/delete",
        usage: "/delete",
        description: "delete every room message",
        tier: AdminTier::SessionAdmin,
        handler: cmd_delete,
    },
    CommandSpec {
        name: "/mute",
        usage: "/mute <name> <seconds>",
        description: "mute a user",
        tier: AdminTier::SessionAdmin,
        handler: cmd_mute,
    },
    CommandSpec {
        name: "/unmute",
        usage: "/unmute <name>",
        description: "lift a mute",
        tier: AdminTier::SessionAdmin,
        handler: cmd_unmute,
    },
    CommandSpec {
        name: "/ban",
        usage: "/ban <name>",
        description: "ban a user and disconnect them",
        tier: AdminTier::SessionAdmin,
        handler: cmd_ban,
    },
    CommandSpec {
        name: "/unban",
        usage: "/unban <name>",
        description: "lift a ban",
        tier: AdminTier::SessionAdmin,
        handler: cmd_unban,
    },
    CommandSpec {
        name: "/ipban",
        usage: "/ipban <name|ip> [reason]",
        description: "ban an address",
        tier: AdminTier::PrivilegedAdmin,
        handler: cmd_ipban,
    },
    CommandSpec {
        name: "/ipunban",
        usage: "/ipunban <ip>",
        description: "lift an address ban",
        tier: AdminTier::PrivilegedAdmin,
        handler: cmd_ipunban,
    },
    CommandSpec {
        name: "/ipbanlist",
        usage: "/ipbanlist",
        description: "list address bans",
        tier: AdminTier::PrivilegedAdmin,
        handler: cmd_ipbanlist,
    },
];

/// Look up a command by name, ignoring case.
pub fn find_command(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Check a `#rgb` .. `#rrggbb` color code (3 to 6 hex digits).
pub fn validate_color(color: &str) -> Result<()> {
    let valid = color
        .strip_prefix('#')
        .is_some_and(|hex| (3..=6).contains(&hex.len()) && hex.chars().all(|c| c.is_ascii_hexdigit()));
    if valid {
        Ok(())
    } else {
        Err(ParlorError::Validation(format!(
            "invalid color code: {color} (expected #rgb to #rrggbb)"
        )))
    }
}

/// Help text for a tier.
pub fn help_text(tier: AdminTier) -> String {
    fn section(lines: &mut Vec<String>, wanted: AdminTier) {
        for spec in COMMANDS.iter().filter(|c| c.tier == wanted) {
            lines.push(format!("  {} - {}", spec.usage, spec.description));
        }
    }

    let mut lines = vec!["Commands:".to_string()];
    section(&mut lines, AdminTier::Regular);
    if tier.is_admin() {
        lines.push("Admin commands:".to_string());
        section(&mut lines, AdminTier::SessionAdmin);
    }
    if tier.is_privileged() {
        section(&mut lines, AdminTier::PrivilegedAdmin);
    }
    lines.join("\n")
}

impl ChatHub {
    /// Run a slash command.
    ///
    /// Returns `None` when the first token is not a known command.
    pub async fn dispatch(&self, actor: &Actor, input: &str) -> Option<CommandResult> {
        let (name, ctx) = CommandContext::parse(actor, input)?;
        let spec = find_command(&name)?;

        if actor.tier < spec.tier {
            let needed = if spec.tier.is_privileged() {
                "privileged admin rights"
            } else {
                "admin privileges"
            };
            return Some(CommandResult::Error {
                message: format!("{} requires {needed}", spec.name),
            });
        }

        match (spec.handler)(self, &ctx).await {
            Ok(result) => Some(result),
            Err(e) => Some(CommandResult::Error {
                message: e.to_string(),
            }),
        }
    }

    /// Carry out a command result for `actor`.
    ///
    /// `Error` results come back as [`ParlorError::Command`] so the caller can
    /// report them like any other failed request.
    pub async fn deliver(&self, actor: &Actor, result: CommandResult) -> Result<()> {
        match result {
            CommandResult::Error { message } => Err(ParlorError::Command(message)),
            CommandResult::System { message } => {
                self.bus.broadcast(&ServerEvent::system(message));
                Ok(())
            }
            CommandResult::Private { message } => {
                self.bus.send_to(actor.conn, ServerEvent::system(message));
                Ok(())
            }
            CommandResult::CommandResult {
                user_message,
                result_sender,
                result_message,
                result_color,
            } => {
                let line = self.compose(actor, user_message);
                self.post(line).await;

                let mut outcome = ChatMessage::new(
                    result_sender.as_str(),
                    result_sender.as_str(),
                    result_message,
                    result_color,
                    self.now(),
                );
                outcome.is_command_result = true;
                self.post(outcome).await;
                Ok(())
            }
        }
    }

    fn moderation_target<'a>(&self, state: &RoomState, name: &'a str) -> Target<'a> {
        Target {
            name,
            tier: self.target_tier(state, name),
            present: state.registry.is_present(name),
        }
    }
}

fn cmd_help<'a>(
    _hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move { Ok(CommandResult::private(help_text(ctx.actor.tier))) }.boxed()
}

fn cmd_prm<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        let usage = "/prm <name> <text>";
        let recipient = ctx.arg(0, usage)?;
        let body = ctx.rest[recipient.len()..].trim();
        if body.is_empty() {
            return Err(ParlorError::Validation(format!("usage: {usage}")));
        }
        hub.send_private(ctx.actor, recipient, body).await?;
        Ok(CommandResult::private(format!(
            "Private message sent to {recipient}"
        )))
    }
    .boxed()
}

fn cmd_color<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        let color = ctx.arg(0, "/color <#hex>")?;
        validate_color(color)?;
        hub.store
            .update_account_profile(&ctx.actor.identity, &ProfileUpdate::color(color))
            .await?;
        {
            let mut state = hub.lock();
            hub.set_identity_color(&mut state, &ctx.actor.identity, color);
        }
        Ok(CommandResult::private(format!("Your color is now {color}")))
    }
    .boxed()
}

fn cmd_omi<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        let label = {
            let mut rng = hub.rng.lock().unwrap_or_else(|p| p.into_inner());
            fortune::draw(&mut *rng)
        };
        Ok(CommandResult::CommandResult {
            user_message: ctx.input.to_string(),
            result_sender: OMIKUJI_SENDER.to_string(),
            result_message: label.to_string(),
            result_color: OMIKUJI_COLOR.to_string(),
        })
    }
    .boxed()
}

fn cmd_dice<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        let roll: u8 = {
            let mut rng = hub.rng.lock().unwrap_or_else(|p| p.into_inner());
            rng.random_range(1..=6)
        };
        Ok(CommandResult::CommandResult {
            user_message: ctx.input.to_string(),
            result_sender: DICE_SENDER.to_string(),
            result_message: format!("{} rolled {roll}", ctx.actor.identity),
            result_color: DICE_COLOR.to_string(),
        })
    }
    .boxed()
}

fn cmd_coin<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        let heads = {
            let mut rng = hub.rng.lock().unwrap_or_else(|p| p.into_inner());
            rng.random_bool(0.5)
        };
        Ok(CommandResult::CommandResult {
            user_message: ctx.input.to_string(),
            result_sender: COIN_SENDER.to_string(),
            result_message: if heads { "heads" } else { "tails" }.to_string(),
            result_color: COIN_COLOR.to_string(),
        })
    }
    .boxed()
}

fn cmd_delete<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        {
            let mut state = hub.lock();
            state.ring.clear();
            hub.bus.broadcast(&ServerEvent::AllMessagesDeleted);
        }
        if let Err(e) = hub.store.delete_all_messages().await {
            hub.degraded("history wipe", e);
        }
        info!(admin = %ctx.actor.identity, "Room history deleted");
        Ok(CommandResult::system(format!(
            "All messages were deleted by {}",
            ctx.actor.identity
        )))
    }
    .boxed()
}

fn cmd_mute<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        let usage = "/mute <name> <seconds>";
        let name = ctx.arg(0, usage)?;
        let secs: i64 = ctx
            .arg(1, usage)?
            .parse()
            .map_err(|_| ParlorError::Validation(format!("usage: {usage}")))?;

        let now = hub.now();
        let mut state = hub.lock();
        let target = hub.moderation_target(&state, name);
        state.ledger.mute(ctx.actor.tier, &target, secs, now)?;
        info!(admin = %ctx.actor.identity, user = %name, secs, "User muted");
        Ok(CommandResult::system(format!(
            "{name} has been muted for {secs} seconds"
        )))
    }
    .boxed()
}

fn cmd_unmute<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        let name = ctx.arg(0, "/unmute <name>")?;
        let now = hub.now();
        hub.lock().ledger.unmute(ctx.actor.tier, name, now)?;
        info!(admin = %ctx.actor.identity, user = %name, "User unmuted");
        Ok(CommandResult::system(format!("{name} has been unmuted")))
    }
    .boxed()
}

fn cmd_ban<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        let name = ctx.arg(0, "/ban <name>")?;
        if name == ctx.actor.identity {
            return Err(ParlorError::Validation("you cannot ban yourself".to_string()));
        }

        let mut state = hub.lock();
        let target = hub.moderation_target(&state, name);
        state.ledger.ban(ctx.actor.tier, &target)?;
        hub.evict(&mut state, name, "You have been banned");
        hub.notify_ip_monitors(&state);
        info!(admin = %ctx.actor.identity, user = %name, "User banned");
        Ok(CommandResult::system(format!("{name} has been banned")))
    }
    .boxed()
}

fn cmd_unban<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        let name = ctx.arg(0, "/unban <name>")?;
        let mut state = hub.lock();
        let target = hub.moderation_target(&state, name);
        state.ledger.unban(ctx.actor.tier, &target)?;
        info!(admin = %ctx.actor.identity, user = %name, "User unbanned");
        Ok(CommandResult::system(format!("{name} has been unbanned")))
    }
    .boxed()
}

fn cmd_ipban<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        require_privileged(ctx.actor.tier)?;
        let target = ctx.arg(0, "/ipban <name|ip> [reason]")?;
        let reason = ctx.args[1..].join(" ");
        let reason = (!reason.is_empty()).then_some(reason);

        let ip = {
            let state = hub.lock();
            let ip = match IpTarget::parse(target) {
                IpTarget::Address(ip) => ip,
                IpTarget::Identity(name) => {
                    if hub.target_tier(&state, &name).is_privileged() {
                        return Err(ParlorError::Authorization(format!(
                            "{name} is a privileged admin and cannot be banned"
                        )));
                    }
                    state
                        .registry
                        .ip_of(&name)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            ParlorError::NotFound(format!("no known address for {name}"))
                        })?
                }
            };
            let protected = state
                .registry
                .identities_on_ip(&ip)
                .into_iter()
                .find(|name| hub.target_tier(&state, name).is_privileged());
            if let Some(admin) = protected {
                return Err(ParlorError::Authorization(format!(
                    "{ip} is in use by privileged admin {admin}"
                )));
            }
            ip
        };

        hub.store
            .add_ip_ban(&ip, reason.as_deref(), &ctx.actor.identity)
            .await?;

        let evicted = {
            let mut state = hub.lock();
            let names = state.registry.identities_on_ip(&ip);
            for name in &names {
                hub.evict(&mut state, name, "Your address has been banned");
            }
            hub.notify_ip_monitors(&state);
            names
        };
        info!(admin = %ctx.actor.identity, ip = %ip, evicted = evicted.len(), "Address banned");

        let mut message = format!("Banned {ip}");
        if !evicted.is_empty() {
            message.push_str(&format!(" (disconnected: {})", evicted.join(", ")));
        }
        Ok(CommandResult::private(message))
    }
    .boxed()
}

fn cmd_ipunban<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        require_privileged(ctx.actor.tier)?;
        let ip = ctx.arg(0, "/ipunban <ip>")?;
        hub.store.remove_ip_ban(ip).await?;
        info!(admin = %ctx.actor.identity, ip = %ip, "Address unbanned");
        Ok(CommandResult::private(format!("Unbanned {ip}")))
    }
    .boxed()
}

fn cmd_ipbanlist<'a>(
    hub: &'a ChatHub,
    ctx: &'a CommandContext<'a>,
) -> BoxFuture<'a, Result<CommandResult>> {
    async move {
        require_privileged(ctx.actor.tier)?;
        let bans = match hub.store.get_all_ip_bans().await {
            Ok(bans) => bans,
            Err(e) => {
                warn!(error = %e, "Failed to list address bans");
                return Err(e.into());
            }
        };
        if bans.is_empty() {
            return Ok(CommandResult::private("No address bans"));
        }
        let mut lines = vec![format!("Address bans ({}):", bans.len())];
        for ban in bans {
            let reason = ban.reason.as_deref().unwrap_or("no reason");
            lines.push(format!("  {} by {} ({reason})", ban.ip, ban.banned_by));
        }
        Ok(CommandResult::private(lines.join("\n")))
    }
    .boxed()
}

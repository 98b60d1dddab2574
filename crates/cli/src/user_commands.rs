use {
    anyhow::Result,
    clap::Subcommand,
    hookgate_common::{parse_subscriptions, subscriptions_to_string, validate_token},
    hookgate_config::GatewayConfig,
    hookgate_gateway::server::open_store,
    hookgate_sessions::NewUser,
};

#[derive(Subcommand)]
pub enum UserAction {
    /// Provision a user.
    Add {
        #[arg(long)]
        name: String,
        /// 32-character alphanumeric auth token.
        #[arg(long)]
        token: String,
        /// Webhook URL receiving event notifications.
        #[arg(long, default_value = "")]
        webhook: String,
        /// Comma-separated subscriptions (Message, ReadReceipt, Presence,
        /// HistorySync, ChatPresence, All).
        #[arg(long, default_value = "All")]
        events: String,
        /// Device OS name announced when linking.
        #[arg(long, default_value = "")]
        os_name: String,
        /// Device platform (e.g. CHROME, ANDROID_PHONE).
        #[arg(long, default_value = "")]
        platform: String,
    },
    /// List users and their connection state.
    List,
}

pub async fn handle_users(action: UserAction, config: &GatewayConfig) -> Result<()> {
    let store = open_store(&config.database.path).await?;
    match action {
        UserAction::Add {
            name,
            token,
            webhook,
            events,
            os_name,
            platform,
        } => {
            validate_token(&token)?;
            let user = NewUser {
                name,
                token,
                webhook,
                events: subscriptions_to_string(&parse_subscriptions(&events)),
                os_name,
                platform_type: platform,
            };
            let id = store.create_user(&user).await?;
            println!("created user {id} ({})", user.events);
        },
        UserAction::List => {
            for user in store.list_users().await? {
                let state = if user.connected {
                    "connected"
                } else {
                    "disconnected"
                };
                let jid = if user.jid.is_empty() {
                    "-"
                } else {
                    user.jid.as_str()
                };
                println!(
                    "{:>4}  {:<16} {:<13} {:<28} {}",
                    user.id, user.name, state, jid, user.events
                );
            }
        },
    }
    Ok(())
}

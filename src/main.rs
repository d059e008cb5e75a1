use movier::client::message_card::CardResolver;
use movier::client::services::chat_service::{parse_reply, ChatService};
use movier::client::services::listener::{ListenTarget, ListenerClient, ListenerEvent};
use movier::client::services::tmdb::{self, TitleList, TmdbClient};
use movier::client::utils::session_store;
use movier::common::catalog::{self, Title};
use movier::common::models::{MediaType, Message, WatchlistEntry};
use movier::common::rating;
use movier::server::config::ClientConfig;
use std::io::Write;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use log::info;

const LOCAL_HELP: &str = "Local commands: \
/signup <email> <password> <name> | /login <email> <password> | /logout | \
/listen <group_messages|my_groups|watchlist> [id] | /unlisten <target> [id] | \
/trending [pages] | /upcoming [pages] | /top_rated [pages] | /search <query> | \
/details <movie|series> <id> | /providers <movie|series> <id> | /videos <movie id> | \
/messages <group id> [limit] | /watchlist | /quit. \
Every other command is sent to the server with the session token filled in.";

fn print_reply(raw: &str) {
    // never echo a session token
    let cleaned = raw.split("SESSION:").next().map(str::trim).unwrap_or("");
    match parse_reply(cleaned) {
        Ok(body) => println!("[SERVER] {}", body),
        Err(e) => println!("[SERVER][ERROR] {}", e),
    }
}

fn print_titles(titles: &[Title]) {
    for t in titles {
        let kind = if t.is_series() { "series" } else { "movie" };
        let badge = rating::badge(t.vote_average)
            .map(|b| format!(" [{}%]", b.percent))
            .unwrap_or_default();
        println!("  {:>8} {:<6} {}{}", t.id, kind, t.display_title(), badge);
    }
}

fn print_watchlist(entries: &[WatchlistEntry]) {
    if entries.is_empty() {
        println!("  (empty)");
    }
    for e in entries {
        let rating = e.rating.map(|r| format!(" {}%", r)).unwrap_or_default();
        println!("  {:<8} {:<12} {}{}", e.id, e.status.as_str(), e.title, rating);
    }
}

async fn print_messages(messages: &[Message], cards: Option<&mut CardResolver>) {
    match cards {
        Some(cards) => {
            for m in messages {
                match cards.for_message(m).await {
                    Some(card) => println!("  {} shared {}", m.sender_name, card.summary()),
                    None => println!("  {}", m.preview()),
                }
            }
        }
        None => messages.iter().for_each(|m| println!("  {}", m.preview())),
    }
}

fn parse_target(s: &str) -> Option<ListenTarget> {
    match s {
        "group_messages" => Some(ListenTarget::GroupMessages),
        "my_groups" => Some(ListenTarget::MyGroups),
        "watchlist" => Some(ListenTarget::Watchlist),
        _ => None,
    }
}

fn print_event(event: &ListenerEvent) {
    match event {
        ListenerEvent::Snapshot { topic, data } => {
            let count = data.as_array().map(|a| a.len()).unwrap_or(0);
            println!("\n[LIVE] {} ({} items)", topic, count);
            if topic.ends_with(":messages") {
                if let Some(messages) = event.decode::<Vec<Message>>() {
                    messages.iter().take(5).for_each(|m| println!("  {}", m.preview()));
                }
            } else if topic.ends_with(":watchlist") {
                if let Some(entries) = event.decode::<Vec<WatchlistEntry>>() {
                    print_watchlist(&entries);
                }
            }
        }
        ListenerEvent::Unlistened { topic } => println!("\n[LIVE] stopped {}", topic),
        ListenerEvent::Error { topic, message } => {
            println!("\n[LIVE][ERROR] {} {}", topic.as_deref().unwrap_or(""), message)
        }
        ListenerEvent::Disconnected => println!("\n[LIVE] listener disconnected"),
    }
}

struct Cli {
    config: ClientConfig,
    chat: ChatService,
    tmdb: Option<TmdbClient>,
    cards: Option<CardResolver>,
    session: Option<(String, String)>,
    listener: Option<ListenerClient>,
}

impl Cli {
    fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|(_, token)| token.as_str())
    }

    fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(|(uid, _)| uid.as_str())
    }

    fn remember(&mut self, user_id: String, token: String) {
        if let Err(e) = session_store::save_session_token(&token) {
            println!("[CLIENT] Session not persisted: {}", e);
        }
        self.session = Some((user_id, token));
    }

    fn forget(&mut self) {
        session_store::clear_session_token();
        self.session = None;
        if let Some(mut listener) = self.listener.take() {
            listener.close();
        }
    }

    async fn restore(&mut self) {
        let Some(token) = session_store::load_session_token() else {
            return;
        };
        match self.chat.validate_session(&token).await {
            Ok(user_id) => {
                println!("[CLIENT] Resumed session for {}", user_id);
                self.session = Some((user_id, token));
            }
            Err(e) => {
                info!("[CLIENT] Stored session rejected: {}", e);
                session_store::clear_session_token();
            }
        }
    }

    async fn ensure_listener(&mut self) -> anyhow::Result<&ListenerClient> {
        let token = self.token().ok_or_else(|| anyhow::anyhow!("log in first"))?.to_string();
        if !self.listener.as_ref().is_some_and(|l| l.is_connected()) {
            let url = format!("ws://{}:{}", self.config.websocket_host, self.config.websocket_port);
            let mut listener = ListenerClient::new(url, token);
            if let Some(mut events) = listener.take_events() {
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        print_event(&event);
                        if matches!(event, ListenerEvent::Disconnected) {
                            break;
                        }
                    }
                });
            }
            listener.connect().await?;
            self.listener = Some(listener);
        }
        self.listener.as_ref().ok_or_else(|| anyhow::anyhow!("listener unavailable"))
    }

    fn tmdb(&self) -> anyhow::Result<&TmdbClient> {
        self.tmdb.as_ref().ok_or_else(|| anyhow::anyhow!("set TMDB_API_KEY to browse titles"))
    }

    async fn browse(&self, list: TitleList, args: &[&str]) -> anyhow::Result<()> {
        let pages = args.first().and_then(|p| p.parse().ok()).unwrap_or(1);
        let titles = self.tmdb()?.list_pages(list, pages).await?;
        print_titles(&titles);
        Ok(())
    }

    /// Returns false when the loop should end.
    async fn run_command(&mut self, command: &str, args: &[&str]) -> anyhow::Result<bool> {
        match (command, args) {
            ("/quit", _) => return Ok(false),
            ("/help", _) => {
                println!("{}", LOCAL_HELP);
                print_reply(&self.chat.send_command("/help".to_string()).await?);
            }
            ("/signup", [email, password, name @ ..]) if !name.is_empty() => {
                let session = self.chat.sign_up(email, password, &name.join(" ")).await?;
                println!("[CLIENT] Registered as {}", session.user_id);
                self.remember(session.user_id, session.token);
            }
            ("/login", [email, password]) => {
                let session = self.chat.sign_in(email, password).await?;
                println!("[CLIENT] Logged in as {}", session.user_id);
                self.remember(session.user_id, session.token);
            }
            ("/logout", []) => {
                if let Some(token) = self.token().map(str::to_string) {
                    self.chat.sign_out(&token).await?;
                }
                self.forget();
                println!("[CLIENT] Logged out.");
            }
            ("/reset_password" | "/confirm_reset", _) => {
                print_reply(&self.chat.send_command(format!("{} {}", command, args.join(" "))).await?);
            }
            ("/listen" | "/unlisten", [target, rest @ ..]) => {
                let target = parse_target(target).ok_or_else(|| anyhow::anyhow!("unknown target '{}'", target))?;
                let id = match (rest.first(), target) {
                    (Some(id), _) => id.to_string(),
                    (None, ListenTarget::GroupMessages) => anyhow::bail!("group_messages needs a group id"),
                    (None, _) => self.user_id().unwrap_or_default().to_string(),
                };
                let listener = self.ensure_listener().await?;
                if command == "/listen" {
                    listener.listen(target, &id)?;
                } else {
                    listener.unlisten(target, &id)?;
                }
            }
            ("/trending", _) => self.browse(TitleList::Trending, args).await?,
            ("/upcoming", _) => self.browse(TitleList::Upcoming, args).await?,
            ("/top_rated", _) => self.browse(TitleList::TopRated, args).await?,
            ("/search", query) if !query.is_empty() => {
                let page = self.tmdb()?.search(&query.join(" "), 1).await?;
                print_titles(&page.results);
            }
            ("/details", [kind, id]) => {
                let media_type: MediaType = kind.parse().map_err(anyhow::Error::msg)?;
                let details = self.tmdb()?.details(media_type, id.parse()?).await?;
                let card = movier::client::message_card::CardView::from_details(media_type, &details);
                println!("  {}", card.summary());
                println!("  poster: {}", tmdb::poster500(details.poster_path.as_deref()));
                if let Some(overview) = &details.overview {
                    println!("  {}", overview);
                }
                let cast = match media_type {
                    MediaType::Movie => self.tmdb()?.movie_credits(details.id).await?.cast,
                    MediaType::Series => details.credits.map(|c| c.cast).unwrap_or_default(),
                };
                for member in cast.iter().take(5) {
                    println!("  cast: {} as {}", member.name, member.character.as_deref().unwrap_or("?"));
                }
            }
            ("/providers", [kind, id]) => {
                let media_type: MediaType = kind.parse().map_err(anyhow::Error::msg)?;
                let listing = self.tmdb()?.watch_providers(media_type, id.parse()?).await?;
                let providers = catalog::region_providers(&listing, &self.config.watch_region);
                if providers.is_empty() {
                    println!("  No providers in {}", self.config.watch_region);
                }
                for p in providers {
                    println!("  {} ({})", p.provider_name, tmdb::provider_logo(p.logo_path.as_deref()));
                }
            }
            ("/videos", [id]) => {
                for v in self.tmdb()?.movie_videos(id.parse()?).await? {
                    println!("  {} https://www.youtube.com/watch?v={}", v.name, v.key);
                }
            }
            ("/messages", [group_id, rest @ ..]) => {
                let token = self.token().ok_or_else(|| anyhow::anyhow!("log in first"))?.to_string();
                let limit = rest.first().and_then(|l| l.parse().ok());
                let messages = self.chat.messages(&token, group_id, limit).await?;
                print_messages(&messages, self.cards.as_mut()).await;
            }
            ("/watchlist", []) => {
                let token = self.token().ok_or_else(|| anyhow::anyhow!("log in first"))?.to_string();
                print_watchlist(&self.chat.watchlist(&token).await?);
            }
            _ => {
                let Some(token) = self.token() else {
                    println!("[CLIENT] Log in first!");
                    return Ok(true);
                };
                let line = if args.is_empty() {
                    format!("{} {}", command, token)
                } else {
                    format!("{} {} {}", command, token, args.join(" "))
                };
                print_reply(&self.chat.send_command(line).await?);
            }
        }
        Ok(true)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "warn".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = ClientConfig::from_env();
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("{}:{}", config.default_host, config.default_port));
    let tmdb = TmdbClient::from_config(&config).ok();
    if tmdb.is_none() {
        println!("[CLIENT] TMDB_API_KEY not set, browsing commands are disabled");
    }
    let mut cli = Cli {
        cards: tmdb.clone().map(CardResolver::new),
        tmdb,
        chat: ChatService::new(addr.clone()),
        config,
        session: None,
        listener: None,
    };

    println!("[CLIENT] Connected to {}. Type /help for commands.", addr);
    cli.restore().await;

    let mut input = BufReader::new(stdin());
    let mut line = String::new();
    loop {
        line.clear();
        print!("> ");
        std::io::stdout().flush()?;
        if input.read_line(&mut line).await? == 0 {
            break;
        }
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        let args: Vec<&str> = parts.collect();
        match cli.run_command(command, &args).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("[CLIENT][ERROR] {}", e),
        }
    }

    if let Some(mut listener) = cli.listener.take() {
        listener.close();
    }
    let _ = cli.chat.send_command("/quit".to_string()).await;
    println!("[CLIENT] Bye.");
    Ok(())
}

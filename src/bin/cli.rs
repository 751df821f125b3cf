use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use outfit_service::models::{
    Combination, Item, ItemListResponse, PreferenceListResponse, RecordResponse, SuggestResponse,
};
use outfit_service::routes::RestoreResponse;
use outfit_service::user_models::{LoginResponse, RegisterResponse};
use prettytable::{Cell, Row, Table};
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

const SESSION_FILE: &str = ".outfit-session";

#[derive(Parser)]
#[command(name = "outfit")]
#[command(about = "A CLI tool for the outfit suggestion service", long_about = None)]
struct Cli {
    #[arg(long, env = "OUTFIT_SERVER", default_value = "http://localhost:3000", help = "Service URL")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create a new user account")]
    Signup {
        #[arg(short, long, help = "Username")]
        username: String,

        #[arg(short, long, help = "Password")]
        password: String,
    },

    #[command(about = "Log in to your account")]
    Login {
        #[arg(short, long, help = "Username")]
        username: String,

        #[arg(short, long, help = "Password")]
        password: String,
    },

    #[command(about = "Log out of your account")]
    Logout,

    #[command(about = "Show current user")]
    Whoami,

    #[command(about = "Upload a clothing photo")]
    Upload {
        #[arg(short, long, help = "Path to the image (jpg, jpeg, png, heic)")]
        file: PathBuf,

        #[arg(short, long, help = "Category: top, bottom, shoes or accessory")]
        category: String,
    },

    #[command(about = "List your items")]
    List {
        #[arg(short, long, help = "Only show this category")]
        category: Option<String>,
    },

    #[command(about = "Change the category of an item")]
    Categorize {
        #[arg(short, long, help = "Item ID")]
        item_id: String,

        #[arg(short, long, help = "New category")]
        category: String,
    },

    #[command(about = "Delete an item and its photo")]
    Delete {
        #[arg(short, long, help = "Item ID")]
        item_id: String,
    },

    #[command(about = "Suggest a random outfit")]
    Suggest {
        #[arg(long, help = "Leave out shoes")]
        no_shoes: bool,

        #[arg(long, help = "Leave out accessories")]
        no_accessory: bool,
    },

    #[command(about = "Mark the last suggestion as disliked")]
    Dislike,

    #[command(about = "Mark the last suggestion as a favorite")]
    Favorite,

    #[command(about = "List disliked combinations")]
    Dislikes,

    #[command(about = "List favorite combinations")]
    Favorites,

    #[command(about = "Remove a disliked combination")]
    Undislike {
        #[arg(short, long, help = "Dislike ID")]
        id: String,
    },

    #[command(about = "Remove a favorite combination")]
    Unfavorite {
        #[arg(short, long, help = "Favorite ID")]
        id: String,
    },

    #[command(about = "Download a backup archive")]
    Backup {
        #[arg(short, long, default_value = "outfit_backup.zip", help = "Where to save the archive")]
        output: PathBuf,
    },

    #[command(about = "Restore from a backup archive")]
    Restore {
        #[arg(short, long, help = "Path to the backup zip")]
        file: PathBuf,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Session {
    token: String,
    username: String,
    #[serde(default)]
    last_suggestion: Option<Combination>,
}

impl Session {
    fn save(&self) -> Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(SESSION_FILE, json)?;
        Ok(())
    }

    fn load() -> Option<Self> {
        if Path::new(SESSION_FILE).exists() {
            let data = fs::read_to_string(SESSION_FILE).ok()?;
            serde_json::from_str(&data).ok()
        } else {
            None
        }
    }

    fn clear() -> Result<()> {
        if Path::new(SESSION_FILE).exists() {
            fs::remove_file(SESSION_FILE)?;
        }
        Ok(())
    }
}

struct Api {
    client: Client,
    base: String,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: RequestBuilder, session: &Session) -> RequestBuilder {
        builder.bearer_auth(&session.token)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let api = Api {
        client: Client::new(),
        base: cli.server,
    };

    if let Err(e) = run_command(&api, cli.command).await {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_command(api: &Api, command: Commands) -> Result<()> {
    match command {
        Commands::Signup { username, password } => signup(api, username, password).await,
        Commands::Login { username, password } => login(api, username, password).await,
        Commands::Logout => logout(api).await,
        Commands::Whoami => whoami(),
        Commands::Upload { file, category } => upload(api, &require_login()?, file, category).await,
        Commands::List { category } => list_items(api, &require_login()?, category).await,
        Commands::Categorize { item_id, category } => {
            categorize(api, &require_login()?, item_id, category).await
        }
        Commands::Delete { item_id } => delete_item(api, &require_login()?, item_id).await,
        Commands::Suggest {
            no_shoes,
            no_accessory,
        } => suggest(api, require_login()?, !no_shoes, !no_accessory).await,
        Commands::Dislike => feedback(api, &require_login()?, "dislikes").await,
        Commands::Favorite => feedback(api, &require_login()?, "favorites").await,
        Commands::Dislikes => list_preferences(api, &require_login()?, "dislikes").await,
        Commands::Favorites => list_preferences(api, &require_login()?, "favorites").await,
        Commands::Undislike { id } => remove_preference(api, &require_login()?, "dislikes", id).await,
        Commands::Unfavorite { id } => remove_preference(api, &require_login()?, "favorites", id).await,
        Commands::Backup { output } => backup(api, &require_login()?, output).await,
        Commands::Restore { file } => restore(api, &require_login()?, file).await,
    }
}

fn require_login() -> Result<Session> {
    match Session::load() {
        Some(session) => Ok(session),
        None => bail!("Not logged in. Please run 'outfit login' first."),
    }
}

async fn check(response: Response, action: &str) -> Result<Response> {
    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        bail!("Failed to {} ({}): {}", action, status, error_text);
    }
    Ok(response)
}

async fn signup(api: &Api, username: String, password: String) -> Result<()> {
    let response = api
        .client
        .post(api.url("/users"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await?;
    let result: RegisterResponse = check(response, "sign up").await?.json().await?;

    println!("✅ Account created successfully!");
    println!("   Username: {}", result.username);
    println!("   User ID: {}", result.id);
    println!("\n💡 You can now log in with: outfit login -u {} -p <password>", result.username);

    Ok(())
}

async fn login(api: &Api, username: String, password: String) -> Result<()> {
    let response = api
        .client
        .post(api.url("/sessions"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await?;
    let result: LoginResponse = check(response, "log in").await?.json().await?;

    let session = Session {
        token: result.token,
        username: result.username,
        last_suggestion: None,
    };
    session.save()?;

    println!("✅ Logged in successfully!");
    println!("   Welcome back, {}!", session.username);

    Ok(())
}

async fn logout(api: &Api) -> Result<()> {
    if let Some(session) = Session::load() {
        let response = api
            .authed(api.client.delete(api.url("/sessions")), &session)
            .send()
            .await;
        if let Err(e) = response {
            eprintln!("⚠️  Could not reach server to end session: {}", e);
        }
        Session::clear()?;
        println!("✅ Logged out successfully!");
    } else {
        println!("ℹ️  You are not logged in.");
    }

    Ok(())
}

fn whoami() -> Result<()> {
    match Session::load() {
        Some(session) => println!("👤 Logged in as: {}", session.username),
        None => println!("ℹ️  Not logged in."),
    }
    Ok(())
}

async fn upload(api: &Api, session: &Session, file: PathBuf, category: String) -> Result<()> {
    let bytes = fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("Invalid file path")?
        .to_string();

    let form = multipart::Form::new()
        .text("category", category)
        .part("file", multipart::Part::bytes(bytes).file_name(file_name));
    let response = api
        .authed(api.client.post(api.url("/items")), session)
        .multipart(form)
        .send()
        .await?;
    let item: Item = check(response, "upload").await?.json().await?;

    println!("✅ Uploaded {} as {}", file.display(), item.category);
    println!("   Item ID: {}", item.id);

    Ok(())
}

async fn list_items(api: &Api, session: &Session, category: Option<String>) -> Result<()> {
    let mut request = api.authed(api.client.get(api.url("/items")), session);
    if let Some(category) = &category {
        request = request.query(&[("category", category.to_lowercase())]);
    }
    let result: ItemListResponse = check(request.send().await?, "list items").await?.json().await?;

    if result.items.is_empty() {
        println!("📭 No items found. Upload one with: outfit upload -f <image> -c <category>");
        return Ok(());
    }

    println!("\n👕 Your Items ({})\n", result.items.len());

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Category"),
        Cell::new("File"),
    ]));
    for item in result.items {
        let file_name = Path::new(&item.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| item.path.clone());
        table.add_row(Row::new(vec![
            Cell::new(&item.id),
            Cell::new(item.category.as_str()),
            Cell::new(&file_name),
        ]));
    }
    table.printstd();
    println!();

    Ok(())
}

async fn categorize(api: &Api, session: &Session, item_id: String, category: String) -> Result<()> {
    let response = api
        .authed(api.client.patch(api.url(&format!("/items/{}", item_id))), session)
        .json(&json!({ "category": category.to_lowercase() }))
        .send()
        .await?;
    let item: Item = check(response, "update item").await?.json().await?;

    println!("✅ Item {} is now {}", item.id, item.category);
    Ok(())
}

async fn delete_item(api: &Api, session: &Session, item_id: String) -> Result<()> {
    let response = api
        .authed(api.client.delete(api.url(&format!("/items/{}", item_id))), session)
        .send()
        .await?;
    check(response, "delete item").await?;

    println!("✅ Deleted item {}", item_id);
    Ok(())
}

async fn suggest(api: &Api, mut session: Session, include_shoes: bool, include_accessory: bool) -> Result<()> {
    let response = api
        .authed(api.client.post(api.url("/suggestions")), &session)
        .json(&json!({
            "include_shoes": include_shoes,
            "include_accessory": include_accessory,
        }))
        .send()
        .await?;
    let result: SuggestResponse = check(response, "suggest").await?.json().await?;

    session.last_suggestion = result.suggestion.clone();
    session.save()?;

    let Some(outfit) = result.outfit else {
        println!("😕 {}", result.message);
        return Ok(());
    };

    println!("\n✨ {}\n", result.message);
    let mut table = Table::new();
    table.add_row(Row::new(vec![Cell::new("Slot"), Cell::new("Item"), Cell::new("File")]));
    let slots = [
        ("top", outfit.top),
        ("bottom", outfit.bottom),
        ("shoes", outfit.shoes),
        ("accessory", outfit.accessory),
    ];
    for (slot, item) in slots {
        if let Some(item) = item {
            table.add_row(Row::new(vec![
                Cell::new(slot),
                Cell::new(&item.id),
                Cell::new(&item.path),
            ]));
        }
    }
    table.printstd();
    println!("\n💡 Rate it with: outfit favorite | outfit dislike");

    Ok(())
}

async fn feedback(api: &Api, session: &Session, kind: &str) -> Result<()> {
    let Some(combination) = &session.last_suggestion else {
        bail!("No suggestion to rate. Run 'outfit suggest' first.");
    };

    let response = api
        .authed(api.client.post(api.url(&format!("/{}", kind))), session)
        .json(combination)
        .send()
        .await?;
    let result: RecordResponse = check(response, "record feedback").await?.json().await?;

    println!("✅ {}", result.message);
    Ok(())
}

async fn list_preferences(api: &Api, session: &Session, kind: &str) -> Result<()> {
    let response = api
        .authed(api.client.get(api.url(&format!("/{}", kind))), session)
        .send()
        .await?;
    let result: PreferenceListResponse = check(response, "list combinations").await?.json().await?;

    if result.records.is_empty() {
        println!("📭 No {} recorded.", kind);
        return Ok(());
    }

    println!("\n📋 {} ({})\n", kind, result.records.len());

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Top"),
        Cell::new("Bottom"),
        Cell::new("Shoes"),
        Cell::new("Accessory"),
    ]));
    for record in result.records {
        let combo = record.combination;
        table.add_row(Row::new(vec![
            Cell::new(&record.id),
            Cell::new(&combo.top),
            Cell::new(&combo.bottom),
            Cell::new(combo.shoes.as_deref().unwrap_or("-")),
            Cell::new(combo.accessory.as_deref().unwrap_or("-")),
        ]));
    }
    table.printstd();
    println!();

    Ok(())
}

async fn remove_preference(api: &Api, session: &Session, kind: &str, id: String) -> Result<()> {
    let response = api
        .authed(api.client.delete(api.url(&format!("/{}/{}", kind, id))), session)
        .send()
        .await?;
    check(response, "remove combination").await?;

    println!("✅ Removed {}", id);
    Ok(())
}

async fn backup(api: &Api, session: &Session, output: PathBuf) -> Result<()> {
    let response = api
        .authed(api.client.post(api.url("/backups")), session)
        .send()
        .await?;
    let bytes = check(response, "create backup").await?.bytes().await?;

    fs::write(&output, &bytes).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("✅ Backup saved to {} ({} bytes)", output.display(), bytes.len());

    Ok(())
}

async fn restore(api: &Api, session: &Session, file: PathBuf) -> Result<()> {
    let bytes = fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    let response = api
        .authed(api.client.post(api.url("/backups/restore")), session)
        .header(reqwest::header::CONTENT_TYPE, "application/zip")
        .body(bytes)
        .send()
        .await?;
    let result: RestoreResponse = check(response, "restore backup").await?.json().await?;

    println!("✅ Backup restored successfully!");
    println!("   Store replaced: {}", if result.store_replaced { "yes" } else { "no" });
    println!("   Users restored: {}", result.user_dirs.join(", "));
    println!("   Files restored: {}", result.files_restored);

    Ok(())
}

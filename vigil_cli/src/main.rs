use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use vigil_core::activity::{ActivityCalendar, MonthView};
use vigil_core::auth::{self, AuthProvider};
use vigil_core::bible::{self, BibleApiClient, BibleSource};
use vigil_core::*;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Spiritual habit tracker: sins, prayers and saved verses", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Act as this user id (defaults to [auth] user_id in the config)
    #[arg(long, global = true)]
    user: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a sin or a prayer
    Log {
        #[command(subcommand)]
        entry: LogEntry,
    },

    /// Show the monthly sins & prayers calendar
    Calendar(CalendarArgs),

    /// Read a chapter, marking saved verses
    Read {
        book: String,
        chapter: u32,
    },

    /// Save a verse, or unsave it if already saved
    Save {
        book: String,
        chapter: u32,
        verse: u32,

        /// Verse text (fetched from the bible API when omitted)
        #[arg(long)]
        text: Option<String>,
    },

    /// Remove a saved verse by id, or by BOOK CHAPTER VERSE
    Unsave {
        #[arg(required = true, num_args = 1..=3)]
        target: Vec<String>,
    },

    /// List saved verses
    Saved,

    /// List the books of the bible
    Books,
}

#[derive(Subcommand)]
enum LogEntry {
    /// Log a sin by description or major sin
    Sin {
        description: Option<String>,

        /// One of: pride, lust, greed, envy, gluttony, wrath, sloth
        #[arg(long)]
        major: Option<MajorSin>,
    },

    /// Log a prayer
    Prayer {
        details: Option<String>,

        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Args)]
struct CalendarArgs {
    /// Month to show (YYYY-MM); defaults to the current month
    #[arg(long)]
    month: Option<Month>,

    /// Show the month N months after the chosen one
    #[arg(long, value_name = "N", conflicts_with = "prev")]
    next: Option<u32>,

    /// Show the month N months before the chosen one
    #[arg(long, value_name = "N")]
    prev: Option<u32>,

    /// Also write the month as CSV to this path
    #[arg(long)]
    export: Option<PathBuf>,
}

struct App {
    store: TimedStore<JsonlStore>,
    config: Config,
}

impl App {
    fn user(&self) -> Option<Identity> {
        auth::global().current_user()
    }
}

fn main() -> ExitCode {
    vigil_core::logging::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if matches!(e, Error::AuthRequired(_)) {
                eprintln!("  Pass --user <id> or set [auth] user_id in the config file.");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());

    let identity = match cli.user {
        Some(uid) => Some(Identity::new(uid)),
        None => config.auth.identity(),
    };
    auth::global().set_user(identity);

    let app = App {
        store: TimedStore::new(JsonlStore::new(&data_dir), config.store.timeout()),
        config,
    };

    match cli.command {
        Commands::Log { entry } => cmd_log(&app, entry),
        Commands::Calendar(args) => cmd_calendar(&app, args),
        Commands::Read { book, chapter } => cmd_read(&app, &book, chapter),
        Commands::Save {
            book,
            chapter,
            verse,
            text,
        } => cmd_save(&app, &book, chapter, verse, text),
        Commands::Unsave { target } => cmd_unsave(&app, &target),
        Commands::Saved => cmd_saved(&app),
        Commands::Books => {
            cmd_books();
            Ok(())
        }
    }
}

fn cmd_log(app: &App, entry: LogEntry) -> Result<()> {
    let user = app.user();
    match entry {
        LogEntry::Sin { description, major } => {
            log_sin(&app.store, user.as_ref(), description.as_deref(), major)?;
            println!("✓ Sin logged successfully.");
        }
        LogEntry::Prayer { details, title } => {
            log_prayer(
                &app.store,
                user.as_ref(),
                title.as_deref(),
                details.as_deref().unwrap_or_default(),
            )?;
            println!("✓ Prayer logged successfully.");
        }
    }
    Ok(())
}

fn cmd_calendar(app: &App, args: CalendarArgs) -> Result<()> {
    let mut month = args.month.unwrap_or_else(|| Month::current(&Local));
    if let Some(n) = args.next {
        month = month.forward(n);
    }
    if let Some(n) = args.prev {
        month = month.back(n);
    }
    let mut calendar = ActivityCalendar::new(Local, month);

    let user = app.user();
    calendar.load(&app.store, user.as_ref())?;

    let Some(view) = calendar.view() else {
        return Err(Error::Fetch("calendar is not available".into()));
    };
    display_calendar(&view, Local::now().date_naive());

    if let Some(path) = args.export {
        let rows = vigil_core::export::month_to_csv(&view, &path)?;
        println!("\n✓ Exported {} days to {}", rows, path.display());
    }
    Ok(())
}

fn display_calendar(view: &MonthView, today: NaiveDate) {
    println!("\nSins & Prayers Calendar: {}", view.month);
    println!();
    println!("  Sun Mon Tue Wed Thu Fri Sat");

    let mut line = String::from(" ");
    for _ in 0..view.leading_blanks() {
        line.push_str("    ");
    }
    let mut column = view.leading_blanks();
    for day in &view.days {
        let marker = if day.date == today {
            '<'
        } else if day.sin_count > 0 {
            '*'
        } else {
            ' '
        };
        line.push_str(&format!(" {:>2}{}", day.date.format("%-d"), marker));
        column += 1;
        if column % 7 == 0 {
            println!("{}", line.trim_end());
            line = String::from(" ");
        }
    }
    if !line.trim().is_empty() {
        println!("{}", line.trim_end());
    }
    println!();

    let active: Vec<_> = view.days.iter().filter(|d| !d.is_empty()).collect();
    if active.is_empty() {
        println!("  Nothing logged this month.");
    }
    for day in active {
        let mut parts = Vec::new();
        if day.sin_count > 0 {
            parts.push(format!("{} {}", day.sin_count, EventKind::Sin.label(day.sin_count)));
        }
        if day.prayer_count > 0 {
            parts.push(format!(
                "{} {}",
                day.prayer_count,
                EventKind::Prayer.label(day.prayer_count)
            ));
        }
        println!("  {}  {:<24} {}", day.date, parts.join(", "), day.color());
    }

    println!();
    println!(
        "  Total: {} {}, {} {}",
        view.total(EventKind::Sin),
        EventKind::Sin.label(view.total(EventKind::Sin)),
        view.total(EventKind::Prayer),
        EventKind::Prayer.label(view.total(EventKind::Prayer))
    );
}

/// Bookmarks for the current user; a load failure leaves an empty set
fn load_bookmarks(app: &App) -> BookmarkManager<&TimedStore<JsonlStore>> {
    let manager = BookmarkManager::new(&app.store);
    if let Some(user) = app.user() {
        if let Err(e) = manager.load(&user) {
            eprintln!("Warning: could not load saved verses: {}", e);
        }
    }
    manager
}

fn cmd_read(app: &App, book: &str, chapter: u32) -> Result<()> {
    let client = BibleApiClient::new(&app.config.bible)?;
    let text = client.chapter(book, chapter)?;
    let bookmarks = load_bookmarks(app);

    println!("\n{} {}", text.book, text.chapter);
    if let Some(translation) = &text.translation {
        println!("({})", translation);
    }
    println!();
    for verse in &text.verses {
        let saved = if bookmarks.is_saved(&text.key(verse.number)) {
            " [saved]"
        } else {
            ""
        };
        println!("  {:>3} {}{}", verse.number, verse.text, saved);
    }
    Ok(())
}

fn cmd_save(app: &App, book: &str, chapter: u32, verse: u32, text: Option<String>) -> Result<()> {
    let found = bible::validate_reference(book, chapter)?;
    let key = VerseKey::new(found.name, chapter, verse)?;

    let user = app.user();
    if user.is_none() {
        return Err(Error::AuthRequired("save or unsave verses".into()));
    }

    let bookmarks = load_bookmarks(app);
    let verse_text = match text {
        Some(text) => text,
        // Unsaving needs no text, so skip the fetch
        None if bookmarks.is_saved(&key) => String::new(),
        None => {
            let client = BibleApiClient::new(&app.config.bible)?;
            let chapter = client.chapter(found.name, chapter)?;
            chapter
                .verse(verse)
                .map(|v| v.text.clone())
                .ok_or_else(|| Error::NotFound(format!("{} has no verse {}", found.name, verse)))?
        }
    };

    match bookmarks.toggle_save(user.as_ref(), key.clone(), &verse_text)? {
        ToggleOutcome::Saved(saved) => println!("✓ Saved {} ({})", key, saved.id),
        ToggleOutcome::Unsaved(_) => println!("✓ Removed {} from saved verses", key),
    }
    Ok(())
}

fn cmd_unsave(app: &App, target: &[String]) -> Result<()> {
    let target = match target {
        [id] => {
            let id = uuid::Uuid::parse_str(id)
                .map_err(|_| Error::InvalidInput(format!("not a saved verse id: {}", id)))?;
            UnsaveTarget::Id(id)
        }
        [book, chapter, verse] => {
            let parse = |s: &str| {
                s.parse::<u32>()
                    .map_err(|_| Error::InvalidInput(format!("not a number: {}", s)))
            };
            let name = bible::find_book(book).map(|b| b.name.to_string()).unwrap_or_else(|| book.clone());
            UnsaveTarget::Key(VerseKey::new(name, parse(chapter)?, parse(verse)?)?)
        }
        _ => {
            return Err(Error::InvalidInput(
                "expected an id or BOOK CHAPTER VERSE".into(),
            ))
        }
    };

    let user = app.user();
    if user.is_none() {
        return Err(Error::AuthRequired("delete verses".into()));
    }
    let bookmarks = load_bookmarks(app);
    match bookmarks.unsave(user.as_ref(), &target)? {
        Some(id) => println!("✓ Verse {} deleted", id),
        None => println!("Nothing to unsave."),
    }
    Ok(())
}

fn cmd_saved(app: &App) -> Result<()> {
    let user = app
        .user()
        .ok_or_else(|| Error::AuthRequired("see saved verses".into()))?;
    let bookmarks = BookmarkManager::new(&app.store);
    bookmarks.load(&user)?;

    if bookmarks.is_empty() {
        println!("You haven't saved any verses yet. Save some with `vigil save`.");
        return Ok(());
    }

    for verse in bookmarks.verses() {
        println!("{}", verse.key);
        println!("  \"{}\"", verse.verse_text);
        println!(
            "  saved {}  id {}",
            verse.saved_at.with_timezone(&Local).format("%Y-%m-%d"),
            verse.id
        );
    }
    Ok(())
}

fn cmd_books() {
    for book in bible::BOOKS.iter() {
        println!("{:<18} {:>3} chapters", book.name, book.chapters);
    }
}

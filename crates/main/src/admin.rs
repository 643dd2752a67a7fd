//! CLI admin surface (`list`/`member` subcommands), folded into this binary
//! rather than split into a separate `cli` crate the way the teacher does,
//! since this system has no network admin API for a standalone client to
//! talk to — everything here calls `store` directly.

use common::address;
use store::{List, Membership, SqliteStore};
use utils::{
    gdpr::{Direction as GdprDirection, GdprLog},
    Config,
};

use crate::daemon::Settings;

#[derive(clap::Subcommand)]
pub enum ListAction {
    /// Creates a list, generating its HMAC key. Per spec, a welcome email is
    /// sent on creation when `--admin` names the person to welcome.
    Create {
        address: String,
        #[arg(long)]
        display: String,
        #[arg(long)]
        admin: Option<String>,
    },
    Delete {
        address: String,
    },
    Show {
        address: String,
    },
}

#[derive(clap::Subcommand)]
pub enum MemberAction {
    Add {
        list: String,
        address: String,
        #[arg(long)]
        admin: bool,
        #[arg(long)]
        moderate: bool,
        #[arg(long)]
        notify: bool,
    },
    Remove {
        list: String,
        address: String,
    },
}

fn open_store(config: &Config) -> std::io::Result<SqliteStore> {
    let settings = Settings::from_config(config);
    SqliteStore::open(&settings.db_path).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

/// Opens the dedicated GDPR compliance log (spec §7) alongside the store.
/// Every membership change this CLI makes is recorded here, separately
/// from the `trc` event stream.
fn open_gdpr_log(config: &Config) -> std::io::Result<GdprLog> {
    let settings = Settings::from_config(config);
    if let Some(parent) = settings.gdpr_log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    GdprLog::open(&settings.gdpr_log_path)
}

fn parse_or_fail(input: &str) -> std::io::Result<common::Address> {
    address::parse(input).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
}

pub fn run_list_command(config: &Config, action: ListAction, sendmail: &dyn mta::Sink) -> std::io::Result<()> {
    let store = open_store(config)?;
    match action {
        ListAction::Create { address, display, admin } => {
            let addr = parse_or_fail(&address)?;
            let list = store.create(&addr, &display).map_err(store_err)?;
            println!("created list {} (id {})", list.addr_spec(), list.id);

            if let Some(admin_addr) = admin {
                let admin_addr = parse_or_fail(&admin_addr)?;
                store
                    .add_members(
                        &list,
                        std::slice::from_ref(&admin_addr),
                        Membership { receive: true, moderate: true, notify: true, admin: true },
                    )
                    .map_err(store_err)?;
                let gdpr = open_gdpr_log(config)?;
                record_gdpr(&gdpr, &admin_addr.addr_spec(), GdprDirection::Joined, &list.addr_spec(), "added as list admin at creation");
                send_welcome(&list, &admin_addr, sendmail);
                println!("added {} as admin and sent welcome email", admin_addr.addr_spec());
            }
            Ok(())
        }
        ListAction::Delete { address } => {
            let addr = parse_or_fail(&address)?;
            let list = store.get_list(&addr).map_err(store_err)?.ok_or_else(not_found)?;
            store.delete(list.id).map_err(store_err)?;
            println!("deleted list {}", list.addr_spec());
            Ok(())
        }
        ListAction::Show { address } => {
            let addr = parse_or_fail(&address)?;
            let list = store.get_list(&addr).map_err(store_err)?.ok_or_else(not_found)?;
            print_list(&list);
            Ok(())
        }
    }
}

pub fn run_member_command(config: &Config, action: MemberAction) -> std::io::Result<()> {
    let store = open_store(config)?;
    match action {
        MemberAction::Add { list, address, admin, moderate, notify } => {
            let list_addr = parse_or_fail(&list)?;
            let member_addr = parse_or_fail(&address)?;
            let list = store.get_list(&list_addr).map_err(store_err)?.ok_or_else(not_found)?;
            store
                .add_members(&list, std::slice::from_ref(&member_addr), Membership { receive: true, moderate, notify, admin })
                .map_err(store_err)?;
            let gdpr = open_gdpr_log(config)?;
            record_gdpr(&gdpr, &member_addr.addr_spec(), GdprDirection::Joined, &list.addr_spec(), "cli member add");
            println!("added {} to {}", member_addr.addr_spec(), list.addr_spec());
            Ok(())
        }
        MemberAction::Remove { list, address } => {
            let list_addr = parse_or_fail(&list)?;
            let member_addr = parse_or_fail(&address)?;
            let list = store.get_list(&list_addr).map_err(store_err)?.ok_or_else(not_found)?;
            store.remove_members(list.id, std::slice::from_ref(&member_addr)).map_err(store_err)?;
            let gdpr = open_gdpr_log(config)?;
            record_gdpr(&gdpr, &member_addr.addr_spec(), GdprDirection::Left, &list.addr_spec(), "cli member remove");
            println!("removed {} from {}", member_addr.addr_spec(), list.addr_spec());
            Ok(())
        }
    }
}

fn record_gdpr(gdpr: &GdprLog, addr_spec: &str, direction: GdprDirection, list_addr_spec: &str, reason: &str) {
    if let Err(err) = gdpr.record(addr_spec, direction, list_addr_spec, reason) {
        eprintln!("warning: GDPR log entry could not be written: {err}");
    }
    trc::Event::new(trc::EventType::GdprJoinLeave)
        .with("address", addr_spec.to_string())
        .with("list", list_addr_spec.to_string())
        .send();
}

fn send_welcome(list: &List, to: &common::Address, sink: &dyn mta::Sink) {
    let (subject, body) = listmgr::templates::welcome(list.display_or_local());
    let header = format!(
        "From: \"{}\" <{}>\r\nTo: {}\r\nSubject: {}\r\n\r\n",
        list.display_or_local(),
        list.addr_spec(),
        to.addr_spec(),
        address::encode_mime_word(&subject),
    );
    let envelope_from = format!("{}@{}", list.bounce_local(), list.domain);
    if let Err(err) = sink.send(&envelope_from, &[to.addr_spec()], header.as_bytes(), body.as_bytes()) {
        eprintln!("warning: welcome email could not be sent: {err}");
    }
}

fn print_list(list: &List) {
    println!("address:       {}", list.addr_spec());
    println!("display:       {}", list.display);
    println!("public-signup: {}", list.public_signup);
    println!("hide-from:     {}", list.hide_from);
    println!(
        "actions:       moderator={} member={} known={} unknown={}",
        list.actions.moderator, list.actions.member, list.actions.known, list.actions.unknown
    );
}

fn store_err(e: store::StoreError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

fn not_found() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotFound, "no such list")
}

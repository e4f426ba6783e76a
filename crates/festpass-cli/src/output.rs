//! Plain-text rendering for terminal output.

use festpass_core::auth::{IdentityRecord, SessionSnapshot, SessionStatus};
use festpass_core::models::{AdminUser, Registration, Statistics};

// ============================================================================
// Formatting helpers
// ============================================================================

/// Pad or cut `s` to exactly `width` characters.
fn cell(s: &str, width: usize) -> String {
    let count = s.chars().count();
    if count > width {
        let cut: String = s.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", cut)
    } else {
        format!("{}{}", s, " ".repeat(width - count))
    }
}

fn format_duration(secs: u64) -> String {
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Unauthenticated => "signed out",
        SessionStatus::Authenticating => "signing in",
        SessionStatus::Authenticated => "signed in",
        SessionStatus::Refreshing => "renewing",
    }
}

// ============================================================================
// Session
// ============================================================================

pub fn print_status(snapshot: &SessionSnapshot, memory_only: bool) {
    println!("Session:  {}", status_label(snapshot.status));
    if let Some(ref user) = snapshot.user {
        println!("User:     {} ({})", user.display_name(), user.role_display());
    }
    match snapshot.refresh_in {
        Some(remaining) => println!("Renewal:  in {}", format_duration(remaining.as_secs())),
        None if snapshot.is_authenticated() => println!("Renewal:  not scheduled"),
        None => {}
    }
    if memory_only {
        println!("Storage:  unavailable, session kept in memory only");
    }
}

pub fn print_identity(user: &IdentityRecord) {
    println!("Username: {}", user.display_name());
    if let Some(ref email) = user.email {
        println!("Email:    {}", email);
    }
    println!("Role:     {}", user.role_display());
    println!("Admin:    {}", if user.is_admin() { "yes" } else { "no" });
    if user.raw_payload.is_some() {
        println!("(identity read from the access token, server profile unavailable)");
    }
}

// ============================================================================
// Back office
// ============================================================================

pub fn print_registrations(registrations: &[&Registration], total: usize) {
    println!(
        "{}  {}  {}  {}  {}",
        cell("ID", 6),
        cell("Name", 28),
        cell("Nationality", 16),
        cell("Profile", 14),
        "Status"
    );
    for r in registrations {
        println!(
            "{}  {}  {}  {}  {}",
            cell(&r.id.to_string(), 6),
            cell(&r.full_name(), 28),
            cell(r.nationality.as_deref().unwrap_or("-"), 16),
            cell(r.profile.as_deref().unwrap_or("-"), 14),
            r.status_display()
        );
    }
    if registrations.len() == total {
        println!("{} registrations", total);
    } else {
        println!("{} of {} registrations", registrations.len(), total);
    }
}

pub fn print_statistics(stats: &Statistics) {
    println!("Total:     {}", stats.total());
    println!("Validated: {}", stats.validees);
    println!("Pending:   {}", stats.en_attente);
    println!("Refused:   {}", stats.refusees);
}

pub fn print_users(users: &[AdminUser]) {
    println!("{}  {}  {}  {}", cell("ID", 6), cell("Username", 16), cell("Name", 24), "Role");
    for u in users {
        println!(
            "{}  {}  {}  {}",
            cell(&u.id.to_string(), 6),
            cell(&u.username, 16),
            cell(&u.display_name(), 24),
            u.role.as_deref().unwrap_or("-")
        );
    }
}

use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("portal.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scopes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            number_of_phases INTEGER NOT NULL DEFAULT 3,
            timer_total_hours REAL,
            is_timer_running INTEGER NOT NULL DEFAULT 0,
            current_remaining_seconds INTEGER,
            timer_last_updated TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            roll_no TEXT UNIQUE,
            role TEXT NOT NULL,
            scope_id TEXT,
            FOREIGN KEY(scope_id) REFERENCES scopes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_scope ON users(scope_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teams(
            id TEXT PRIMARY KEY,
            scope_id TEXT NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            FOREIGN KEY(scope_id) REFERENCES scopes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teams_scope ON teams(scope_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS team_members(
            team_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            approved INTEGER NOT NULL DEFAULT 1,
            is_leader INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(team_id, user_id),
            FOREIGN KEY(team_id) REFERENCES teams(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_team_members_user ON team_members(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects(
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            category TEXT,
            max_team_size INTEGER,
            FOREIGN KEY(team_id) REFERENCES teams(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_requests(
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            FOREIGN KEY(team_id) REFERENCES teams(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_project_requests_team ON project_requests(team_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reviews(
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL,
            review_phase INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            faculty_id TEXT,
            scheduled_at TEXT NOT NULL,
            completed_at TEXT,
            superseded INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(team_id) REFERENCES teams(id),
            FOREIGN KEY(faculty_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reviews_team_phase ON reviews(team_id, review_phase)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reviews_status ON reviews(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_marks(
            id TEXT PRIMARY KEY,
            review_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            total REAL NOT NULL DEFAULT 0,
            is_absent INTEGER NOT NULL DEFAULT 0,
            UNIQUE(review_id, user_id),
            FOREIGN KEY(review_id) REFERENCES reviews(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_mark_criteria(
            review_mark_id TEXT NOT NULL,
            criterion TEXT NOT NULL,
            score REAL NOT NULL,
            max_score REAL NOT NULL,
            PRIMARY KEY(review_mark_id, criterion),
            FOREIGN KEY(review_mark_id) REFERENCES review_marks(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_assignments(
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            review_phase INTEGER NOT NULL,
            mode TEXT NOT NULL,
            access_starts_at TEXT NOT NULL,
            access_expires_at TEXT,
            UNIQUE(project_id, faculty_id, review_phase),
            FOREIGN KEY(project_id) REFERENCES projects(id),
            FOREIGN KEY(faculty_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_review_assignments_faculty ON review_assignments(faculty_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS venues(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            location TEXT,
            capacity INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lab_sessions(
            id TEXT PRIMARY KEY,
            venue_id TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            scope_id TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            FOREIGN KEY(venue_id) REFERENCES venues(id),
            FOREIGN KEY(faculty_id) REFERENCES users(id),
            FOREIGN KEY(scope_id) REFERENCES scopes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lab_sessions_venue ON lab_sessions(venue_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lab_sessions_start ON lab_sessions(start_time)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lab_session_students(
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(session_id, student_id),
            FOREIGN KEY(session_id) REFERENCES lab_sessions(id),
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lab_session_students_student ON lab_session_students(student_id)",
        [],
    )?;

    Ok(conn)
}

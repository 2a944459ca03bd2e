// Copyright (C) 2025 AmbonMUD contributors. This program is free software:
// you can redistribute it and/or modify it under the terms of the GNU General
// Public License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The login/signup state machine and its worker. State transitions run on
//! the engine thread; everything that touches the repository or Argon2 is
//! delegated to the auth worker so the tick loop never blocks on I/O or
//! password hashing.

use crate::engine::Engine;
use crate::now_ms;
use ambonmud_common::ids::{PlayerId, RoomId, SessionId};
use ambonmud_common::model::PlayerRecord;
use ambonmud_common::Outbound;
use ambonmud_db::{RepositoryError, WriteBehind};
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts at allocating a fresh `Guest<N>` name before giving up.
const MAX_GUEST_ATTEMPTS: u32 = 10;

/// Per-session authentication progress. Strictly monotonic except for the
/// error edges back towards `Menu`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    Unauthed,
    Menu,
    LoginUsername,
    LoginPassword { username: String },
    SignupUsername,
    SignupPassword { username: String },
    SignupPasswordConfirm { username: String, pass1: String },
    Authed { player_id: PlayerId },
}

/// Work shipped to the auth worker.
pub enum AuthCmd {
    CheckSignupName {
        session_id: SessionId,
        username: String,
    },
    Login {
        session_id: SessionId,
        username: String,
        password: String,
    },
    FinishSignup {
        session_id: SessionId,
        username: String,
        password: String,
    },
    Guest {
        session_id: SessionId,
    },
}

/// Results the engine drains once per tick.
pub enum AuthReply {
    NameCheck {
        session_id: SessionId,
        username: String,
        available: bool,
    },
    LoginOk {
        session_id: SessionId,
        record: PlayerRecord,
    },
    LoginFailed {
        session_id: SessionId,
    },
    SignupOk {
        session_id: SessionId,
        record: PlayerRecord,
    },
    SignupFailed {
        session_id: SessionId,
        reason: String,
    },
    GuestOk {
        session_id: SessionId,
        record: PlayerRecord,
    },
    GuestFailed {
        session_id: SessionId,
    },
}

pub fn valid_username(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Repository and password work for the auth flow, off the engine thread.
pub struct AuthWorker {
    db: Arc<WriteBehind>,
    start_room: RoomId,
    cmds: flume::Receiver<AuthCmd>,
    replies: flume::Sender<AuthReply>,
    next_guest: u32,
}

impl AuthWorker {
    pub fn new(
        db: Arc<WriteBehind>,
        start_room: RoomId,
    ) -> (flume::Sender<AuthCmd>, flume::Receiver<AuthReply>, Self) {
        let (cmd_tx, cmd_rx) = flume::unbounded();
        let (reply_tx, reply_rx) = flume::unbounded();
        (
            cmd_tx,
            reply_rx,
            Self {
                db,
                start_room,
                cmds: cmd_rx,
                replies: reply_tx,
                next_guest: 1,
            },
        )
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        while let Ok(cmd) = self.cmds.recv_async().await {
            let reply = match cmd {
                AuthCmd::CheckSignupName {
                    session_id,
                    username,
                } => self.check_name(session_id, username).await,
                AuthCmd::Login {
                    session_id,
                    username,
                    password,
                } => self.login(session_id, &username, &password).await,
                AuthCmd::FinishSignup {
                    session_id,
                    username,
                    password,
                } => self.finish_signup(session_id, &username, &password).await,
                AuthCmd::Guest { session_id } => self.guest(session_id).await,
            };
            if self.replies.send(reply).is_err() {
                break;
            }
        }
        debug!("auth worker stopped");
    }

    async fn check_name(&self, session_id: SessionId, username: String) -> AuthReply {
        let available = match self.db.find_by_name_lower(&username.to_lowercase()).await {
            Ok(existing) => existing.is_none(),
            Err(e) => {
                warn!(error = %e, "signup name check failed");
                false
            }
        };
        AuthReply::NameCheck {
            session_id,
            username,
            available,
        }
    }

    async fn login(&self, session_id: SessionId, username: &str, password: &str) -> AuthReply {
        let record = match self.db.find_by_name_lower(&username.to_lowercase()).await {
            Ok(Some(record)) => record,
            Ok(None) => return AuthReply::LoginFailed { session_id },
            Err(e) => {
                warn!(error = %e, "login lookup failed");
                return AuthReply::LoginFailed { session_id };
            }
        };
        let Some(hash) = &record.password_hash else {
            // Guest records have no password and cannot be logged into.
            return AuthReply::LoginFailed { session_id };
        };
        if verify_password(password, hash) {
            AuthReply::LoginOk { session_id, record }
        } else {
            AuthReply::LoginFailed { session_id }
        }
    }

    async fn finish_signup(
        &self,
        session_id: SessionId,
        username: &str,
        password: &str,
    ) -> AuthReply {
        let mut record = match self
            .db
            .create(username, self.start_room.clone(), now_ms())
            .await
        {
            Ok(record) => record,
            Err(RepositoryError::NameTaken) => {
                return AuthReply::SignupFailed {
                    session_id,
                    reason: "That name is already taken.".to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "signup create failed");
                return AuthReply::SignupFailed {
                    session_id,
                    reason: "Character creation failed.".to_string(),
                };
            }
        };

        match hash_password(password) {
            Ok(hash) => {
                record.password_hash = Some(hash);
                record.account_bound = true;
                self.db.save(record.clone());
                info!(name = %record.name, "new account created");
                AuthReply::SignupOk { session_id, record }
            }
            Err(e) => {
                // Compensating delete: the player record must not survive a
                // failed account creation.
                warn!(error = %e, "password hashing failed, rolling back create");
                if let Err(del) = self.db.delete(record.id).await {
                    warn!(error = %del, "compensating delete failed");
                }
                AuthReply::SignupFailed {
                    session_id,
                    reason: "Character creation failed.".to_string(),
                }
            }
        }
    }

    async fn guest(&mut self, session_id: SessionId) -> AuthReply {
        for _ in 0..MAX_GUEST_ATTEMPTS {
            let name = format!("Guest{}", self.next_guest);
            self.next_guest += 1;
            match self.db.create(&name, self.start_room.clone(), now_ms()).await {
                Ok(record) => {
                    info!(name = %record.name, "guest joined");
                    return AuthReply::GuestOk { session_id, record };
                }
                Err(RepositoryError::NameTaken) => continue,
                Err(e) => {
                    warn!(error = %e, "guest create failed");
                    break;
                }
            }
        }
        AuthReply::GuestFailed { session_id }
    }
}

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Any parse or verification error counts as a mismatch.
fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Drives the auth state machine for one input line. Runs on the engine
/// thread; anything needing the repository is shipped to the worker and the
/// session is marked pending until the reply lands.
pub fn handle_line(engine: &mut Engine, session_id: SessionId, line: &str) {
    let Some(session) = engine.sessions.get_mut(&session_id) else {
        return;
    };
    if session.auth_pending {
        // A repository round trip is in flight; swallow input until it lands.
        return;
    }
    let line = line.trim().to_string();
    let state = session.auth.clone();

    match state {
        AuthState::Unauthed | AuthState::Authed { .. } => {}
        AuthState::Menu => match line.to_lowercase().as_str() {
            "1" | "login" => {
                engine.set_auth(session_id, AuthState::LoginUsername);
                engine.auth_prompt(session_id, "Username: ");
            }
            "2" | "create" => {
                engine.set_auth(session_id, AuthState::SignupUsername);
                engine.auth_prompt(session_id, "Choose a username: ");
            }
            "3" | "guest" => {
                engine.mark_auth_pending(session_id);
                engine.send_auth_cmd(AuthCmd::Guest { session_id });
            }
            _ => {
                engine.emit(session_id, Outbound::SendError("Please choose 1, 2 or 3.".into()));
                engine.emit(session_id, Outbound::ShowLoginScreen);
                engine.auth_prompt(session_id, "> ");
            }
        },
        AuthState::LoginUsername => {
            if line.is_empty() {
                engine.auth_prompt(session_id, "Username: ");
            } else {
                engine.set_auth(session_id, AuthState::LoginPassword { username: line });
                engine.auth_prompt(session_id, "Password: ");
            }
        }
        AuthState::LoginPassword { username } => {
            engine.mark_auth_pending(session_id);
            engine.send_auth_cmd(AuthCmd::Login {
                session_id,
                username,
                password: line,
            });
        }
        AuthState::SignupUsername => {
            if !valid_username(&line) {
                engine.emit(
                    session_id,
                    Outbound::SendError(
                        "Names are letters, digits and underscores only.".into(),
                    ),
                );
                engine.auth_prompt(session_id, "Choose a username: ");
            } else if engine.players.is_name_online(&line) {
                engine.emit(
                    session_id,
                    Outbound::SendError("That name is already taken.".into()),
                );
                engine.auth_prompt(session_id, "Choose a username: ");
            } else {
                engine.mark_auth_pending(session_id);
                engine.send_auth_cmd(AuthCmd::CheckSignupName {
                    session_id,
                    username: line,
                });
            }
        }
        AuthState::SignupPassword { username } => {
            if line.len() < 6 {
                engine.emit(
                    session_id,
                    Outbound::SendError("Passwords must be at least 6 characters.".into()),
                );
                engine.auth_prompt(session_id, "Password: ");
            } else {
                engine.set_auth(
                    session_id,
                    AuthState::SignupPasswordConfirm {
                        username,
                        pass1: line,
                    },
                );
                engine.auth_prompt(session_id, "Confirm password: ");
            }
        }
        AuthState::SignupPasswordConfirm { username, pass1 } => {
            if line != pass1 {
                engine.emit(
                    session_id,
                    Outbound::SendError("Passwords do not match.".into()),
                );
                engine.set_auth(session_id, AuthState::SignupPassword { username });
                engine.auth_prompt(session_id, "Password: ");
            } else {
                engine.mark_auth_pending(session_id);
                engine.send_auth_cmd(AuthCmd::FinishSignup {
                    session_id,
                    username,
                    password: pass1,
                });
            }
        }
    }
}

/// Applies one worker reply on the engine thread.
pub fn apply_reply(engine: &mut Engine, reply: AuthReply) {
    match reply {
        AuthReply::NameCheck {
            session_id,
            username,
            available,
        } => {
            engine.clear_auth_pending(session_id);
            if engine.sessions.get(&session_id).is_none() {
                return;
            }
            if available {
                engine.set_auth(session_id, AuthState::SignupPassword { username });
                engine.auth_prompt(session_id, "Password: ");
            } else {
                engine.emit(
                    session_id,
                    Outbound::SendError("That name is already taken.".into()),
                );
                engine.set_auth(session_id, AuthState::SignupUsername);
                engine.auth_prompt(session_id, "Choose a username: ");
            }
        }
        AuthReply::LoginOk { session_id, record } => {
            engine.clear_auth_pending(session_id);
            if engine.sessions.get(&session_id).is_none() {
                return;
            }
            // Duplicate detection includes currently online players.
            if engine.players.is_name_online(&record.name) {
                engine.emit(
                    session_id,
                    Outbound::SendError("That character is already playing.".into()),
                );
                engine.set_auth(session_id, AuthState::Menu);
                engine.emit(session_id, Outbound::ShowLoginScreen);
                engine.auth_prompt(session_id, "> ");
                return;
            }
            engine.bind_player(session_id, record);
        }
        AuthReply::LoginFailed { session_id } => {
            engine.clear_auth_pending(session_id);
            login_failure(engine, session_id);
        }
        AuthReply::SignupOk { session_id, record }
        | AuthReply::GuestOk { session_id, record } => {
            engine.clear_auth_pending(session_id);
            if engine.sessions.get(&session_id).is_none() {
                return;
            }
            engine.bind_player(session_id, record);
        }
        AuthReply::SignupFailed { session_id, reason } => {
            engine.clear_auth_pending(session_id);
            if engine.sessions.get(&session_id).is_none() {
                return;
            }
            engine.emit(session_id, Outbound::SendError(reason));
            engine.set_auth(session_id, AuthState::SignupUsername);
            engine.auth_prompt(session_id, "Choose a username: ");
        }
        AuthReply::GuestFailed { session_id } => {
            engine.clear_auth_pending(session_id);
            if engine.sessions.get(&session_id).is_none() {
                return;
            }
            engine.emit(session_id, Outbound::SendError("Guest login failed.".into()));
            engine.set_auth(session_id, AuthState::Menu);
            engine.emit(session_id, Outbound::ShowLoginScreen);
            engine.auth_prompt(session_id, "> ");
        }
    }
}

fn login_failure(engine: &mut Engine, session_id: SessionId) {
    let login_cfg = engine.config.login.clone();
    let Some(session) = engine.sessions.get_mut(&session_id) else {
        return;
    };
    session.total_auth_failures += 1;
    session.wrong_password_count += 1;
    let total = session.total_auth_failures;
    let wrong = session.wrong_password_count;

    if total >= login_cfg.max_failed_attempts_before_disconnect {
        engine.emit(
            session_id,
            Outbound::Close {
                reason: "too many failed login attempts".into(),
            },
        );
        return;
    }
    if wrong > login_cfg.max_wrong_password_retries {
        engine.emit(session_id, Outbound::SendError("Login failed.".into()));
        engine.set_auth(session_id, AuthState::Menu);
        engine.emit(session_id, Outbound::ShowLoginScreen);
        engine.auth_prompt(session_id, "> ");
    } else {
        engine.emit(session_id, Outbound::SendError("Login failed.".into()));
        engine.set_auth(session_id, AuthState::LoginUsername);
        engine.auth_prompt(session_id, "Username: ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn username_charset() {
        assert!(valid_username("Brin_42"));
        assert!(!valid_username(""));
        assert!(!valid_username("Brin the Bold"));
        assert!(!valid_username("brin!"));
    }

    #[test]
    fn verify_tolerates_garbage_hashes() {
        assert_eq!(verify_password("secret", "not-a-phc-string"), false);
        assert_eq!(verify_password("secret", ""), false);
    }

    #[test]
    fn hash_then_verify_roundtrip() {
        let hash = hash_password("hunter42").unwrap();
        assert!(verify_password("hunter42", &hash));
        assert!(!verify_password("hunter43", &hash));
    }
}

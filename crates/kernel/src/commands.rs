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

//! The built-in command handlers and the default router wiring. Handlers
//! never close over state: they are plain functions over the engine, which
//! keeps the dispatch table a flat map of function pointers.

use crate::command::{Command, CommandKind};
use crate::engine::{Engine, PendingWho, WHO_AGGREGATION_MS};
use crate::router::CommandRouter;
use ambonmud_cluster::EngineMessage;
use ambonmud_common::ids::{ItemTemplateId, RoomId, SessionId};
use ambonmud_common::model::ItemInstance;
use ambonmud_common::Outbound;
use rand::seq::IteratorRandom;
use std::sync::atomic::Ordering;
use tracing::{info, warn};
use uuid::Uuid;

pub fn default_router() -> CommandRouter {
    let mut router = CommandRouter::new();
    router.register(CommandKind::Noop, noop);
    router.register(CommandKind::Say, say);
    router.register(CommandKind::Gossip, gossip);
    router.register(CommandKind::Tell, tell);
    router.register(CommandKind::Who, who);
    router.register(CommandKind::Look, look);
    router.register(CommandKind::Stats, stats);
    router.register(CommandKind::Inventory, inventory);
    router.register(CommandKind::Get, get);
    router.register(CommandKind::Drop, drop_item);
    router.register(CommandKind::Equip, equip);
    router.register(CommandKind::Remove, remove);
    router.register(CommandKind::Attack, attack);
    router.register(CommandKind::Flee, flee);
    router.register(CommandKind::Move, move_player);
    router.register(CommandKind::DialogueChoice, dialogue_choice);
    router.register(CommandKind::Ansi, ansi);
    router.register(CommandKind::Clear, clear);
    router.register(CommandKind::Help, help);
    router.register(CommandKind::Quit, quit);
    router.register(CommandKind::Kick, kick);
    router.register(CommandKind::Shutdown, shutdown);
    router.register(CommandKind::Transfer, transfer);
    router.register(CommandKind::Unknown, unknown);
    router.register(CommandKind::Invalid, invalid);
    router
}

fn noop(_engine: &mut Engine, _session_id: SessionId, _command: Command) {}

fn say(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Say { msg } = command else { return };
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    let name = player.record.name.clone();
    let room = player.record.room_id.clone();
    engine.send_text(session_id, format!("You say, '{msg}'"));
    engine.room_broadcast(&room, Some(session_id), &format!("{name} says, '{msg}'"));
}

fn gossip(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Gossip { msg } = command else { return };
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    let name = player.record.name.clone();
    // Deliver locally, then fan out; remote engines drop our own envelope on
    // the broadcast channel so nobody hears it twice.
    engine.deliver_global("gossip", &name, &msg);
    engine.bus.broadcast(EngineMessage::GlobalBroadcast {
        kind: "gossip".to_string(),
        sender_name: name,
        text: msg,
        source_engine_id: engine.engine_id.clone(),
    });
}

fn tell(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Tell { target, msg } = command else { return };
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    let from = player.record.name.clone();

    if let Some(target_session) = engine.players.session_by_name(&target) {
        if target_session == session_id {
            engine.send_error(session_id, "Talking to yourself again?");
            return;
        }
        let target_name = engine
            .players
            .get(target_session)
            .map(|p| p.record.name.clone())
            .unwrap_or(target);
        engine.send_text(target_session, format!("{from} tells you: {msg}"));
        engine.prompt(target_session);
        engine.send_info(session_id, format!("You tell {target_name}: {msg}"));
        return;
    }

    if !engine.sharding_enabled {
        engine.send_error(session_id, "They aren't anywhere to be found.");
        return;
    }

    // Remote lookup must not block the tick: resolve on a task and push the
    // outcome straight to the outbound router.
    let index = engine.player_index.clone();
    let bus = engine.bus.clone();
    let router = engine.router.clone();
    let engine_id = engine.engine_id.clone();
    tokio::spawn(async move {
        match index.lookup_engine_id(&target).await {
            Some(owner) if owner != engine_id => {
                bus.send_to(
                    &owner,
                    EngineMessage::TellMessage {
                        from,
                        to: target.clone(),
                        text: msg.clone(),
                    },
                );
                router.emit(session_id, Outbound::SendInfo(format!("You tell {target}: {msg}")));
            }
            _ => {
                router.emit(
                    session_id,
                    Outbound::SendError("They aren't anywhere to be found.".to_string()),
                );
            }
        }
        router.emit(session_id, Outbound::SendPrompt(Default::default()));
    });
}

fn who(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Who = command else { return };
    let local = engine.local_who();

    if !engine.sharding_enabled {
        engine.send_info(session_id, format!("Online players ({}):", local.len()));
        for p in &local {
            engine.send_text(
                session_id,
                format!("  {:<16} level {:<3} [{}]", p.name, p.level, p.zone),
            );
        }
        return;
    }

    let request_id = Uuid::new_v4();
    engine.pending_who.insert(
        request_id,
        PendingWho {
            requester: session_id,
            players: local,
            deadline_ms: engine.now_ms + WHO_AGGREGATION_MS,
        },
    );
    engine.bus.broadcast(EngineMessage::WhoRequest {
        request_id,
        reply_to_engine_id: engine.engine_id.clone(),
    });
    // Output is deferred until the aggregation window closes.
    engine.suppress_prompt = true;
}

fn look(engine: &mut Engine, session_id: SessionId, _command: Command) {
    engine.look(session_id);
}

fn stats(engine: &mut Engine, session_id: SessionId, _command: Command) {
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    let r = &player.record;
    engine.send_info(session_id, format!("{}, level {}", r.name, r.level));
    engine.send_text(
        session_id,
        format!("  HP {}/{}  Mana {}/{}  XP {}", r.hp, r.max_hp, r.mana, r.max_mana, r.xp_total),
    );
    engine.send_text(
        session_id,
        format!(
            "  Str {}  Dex {}  Con {}  Int {}",
            r.stats.strength, r.stats.dexterity, r.stats.constitution, r.stats.intelligence
        ),
    );
}

fn inventory(engine: &mut Engine, session_id: SessionId, _command: Command) {
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    if player.record.inventory.is_empty() && player.record.equipment.is_empty() {
        engine.send_text(session_id, "You are carrying nothing.");
        return;
    }
    let mut lines = Vec::new();
    for (slot, template_id) in &player.record.equipment {
        if let Some(template) = engine.world.item_templates.get(template_id) {
            lines.push(format!("  {} (equipped, {:?})", template.name, slot));
        }
    }
    for item in &player.record.inventory {
        if let Some(template) = engine.world.item_templates.get(&item.template) {
            if item.qty > 1 {
                lines.push(format!("  {} (x{})", template.name, item.qty));
            } else {
                lines.push(format!("  {}", template.name));
            }
        }
    }
    engine.send_info(session_id, "You are carrying:");
    for line in lines {
        engine.send_text(session_id, line);
    }
}

/// First template in `items` whose name contains the keyword.
fn match_item(
    engine: &Engine,
    items: &[ItemInstance],
    keyword: &str,
) -> Option<ItemTemplateId> {
    let keyword = keyword.to_lowercase();
    items
        .iter()
        .find(|item| {
            engine
                .world
                .item_templates
                .get(&item.template)
                .is_some_and(|t| t.name.to_lowercase().contains(&keyword))
        })
        .map(|item| item.template.clone())
}

fn take_one(items: &mut Vec<ItemInstance>, template: &ItemTemplateId) {
    if let Some(pos) = items.iter().position(|i| &i.template == template) {
        if items[pos].qty > 1 {
            items[pos].qty -= 1;
        } else {
            items.remove(pos);
        }
    }
}

fn add_one(items: &mut Vec<ItemInstance>, template: ItemTemplateId) {
    match items.iter_mut().find(|i| i.template == template) {
        Some(stack) => stack.qty += 1,
        None => items.push(ItemInstance { template, qty: 1 }),
    }
}

fn get(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Get { item } = command else { return };
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    let room = player.record.room_id.clone();
    let name = player.record.name.clone();

    let Some(template_id) = engine
        .ground
        .get(&room)
        .and_then(|items| match_item(engine, items, &item))
    else {
        engine.send_error(session_id, "There is no such thing here.");
        return;
    };
    let item_name = engine
        .world
        .item_templates
        .get(&template_id)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| template_id.to_string());

    if let Some(items) = engine.ground.get_mut(&room) {
        take_one(items, &template_id);
        if items.is_empty() {
            engine.ground.remove(&room);
        }
    }
    if let Some(player) = engine.players.get_mut(session_id) {
        add_one(&mut player.record.inventory, template_id);
        engine.db.save(player.record.clone());
    }
    engine.send_text(session_id, format!("You pick up {item_name}."));
    engine.room_broadcast(&room, Some(session_id), &format!("{name} picks up {item_name}."));
}

fn drop_item(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Drop { item } = command else { return };
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    let room = player.record.room_id.clone();
    let name = player.record.name.clone();

    let Some(template_id) = match_item(engine, &player.record.inventory, &item) else {
        engine.send_error(session_id, "You aren't carrying that.");
        return;
    };
    let item_name = engine
        .world
        .item_templates
        .get(&template_id)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| template_id.to_string());

    if let Some(player) = engine.players.get_mut(session_id) {
        take_one(&mut player.record.inventory, &template_id);
        engine.db.save(player.record.clone());
    }
    add_one(engine.ground.entry(room.clone()).or_default(), template_id);
    engine.send_text(session_id, format!("You drop {item_name}."));
    engine.room_broadcast(&room, Some(session_id), &format!("{name} drops {item_name}."));
}

fn equip(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Equip { item } = command else { return };
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    let Some(template_id) = match_item(engine, &player.record.inventory, &item) else {
        engine.send_error(session_id, "You aren't carrying that.");
        return;
    };
    let Some(template) = engine.world.item_templates.get(&template_id).cloned() else {
        return;
    };
    let Some(slot) = template.slot else {
        engine.send_error(session_id, "You can't equip that.");
        return;
    };

    if let Some(player) = engine.players.get_mut(session_id) {
        take_one(&mut player.record.inventory, &template_id);
        if let Some(previous) = player.record.equipment.insert(slot, template_id) {
            add_one(&mut player.record.inventory, previous);
        }
        engine.db.save(player.record.clone());
    }
    engine.send_text(session_id, format!("You equip {}.", template.name));
}

fn remove(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Remove { item } = command else { return };
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    let keyword = item.to_lowercase();
    let found = player.record.equipment.iter().find(|(_, template_id)| {
        engine
            .world
            .item_templates
            .get(template_id)
            .is_some_and(|t| t.name.to_lowercase().contains(&keyword))
    });
    let Some((slot, template_id)) = found.map(|(s, t)| (*s, t.clone())) else {
        engine.send_error(session_id, "You aren't wearing that.");
        return;
    };
    let item_name = engine
        .world
        .item_templates
        .get(&template_id)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| template_id.to_string());

    if let Some(player) = engine.players.get_mut(session_id) {
        player.record.equipment.remove(&slot);
        add_one(&mut player.record.inventory, template_id);
        engine.db.save(player.record.clone());
    }
    engine.send_text(session_id, format!("You remove {item_name}."));
}

fn attack(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Attack { target } = command else { return };
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    if player.combat_target.is_some() {
        engine.send_error(session_id, "You are already fighting!");
        return;
    }
    let room = player.record.room_id.clone();
    let name = player.record.name.clone();
    let Some(mob_id) = engine.mobs.find_in_room(&room, &target) else {
        engine.send_error(session_id, "There is no such target here.");
        return;
    };
    let mob_name = engine
        .mobs
        .get(&mob_id)
        .map(|m| m.name.clone())
        .unwrap_or_default();

    if let Some(player) = engine.players.get_mut(session_id) {
        player.combat_target = Some(mob_id.clone());
    }
    if let Some(mob) = engine.mobs.get_mut(&mob_id) {
        mob.combat_target.get_or_insert(session_id);
    }
    engine.send_text(session_id, format!("You attack {mob_name}!"));
    engine.room_broadcast(&room, Some(session_id), &format!("{name} attacks {mob_name}!"));
}

fn flee(engine: &mut Engine, session_id: SessionId, _command: Command) {
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    let Some(mob_id) = player.combat_target.clone() else {
        engine.send_error(session_id, "You are not fighting anyone.");
        return;
    };
    let room = player.record.room_id.clone();

    if let Some(player) = engine.players.get_mut(session_id) {
        player.combat_target = None;
    }
    if let Some(mob) = engine.mobs.get_mut(&mob_id) {
        if mob.combat_target == Some(session_id) {
            mob.combat_target = None;
        }
    }
    engine.send_text(session_id, "You flee!");

    // Bolt through a random local exit if one exists.
    let exit = engine.world.room(&room).and_then(|r| {
        r.exits
            .values()
            .filter(|target| !engine.is_remote_zone(&target.zone()))
            .choose(&mut rand::rng())
            .cloned()
    });
    if let Some(to) = exit {
        engine.move_to(session_id, to, None);
    }
}

fn move_player(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Move { dir } = command else { return };
    engine.try_move(session_id, dir);
}

fn dialogue_choice(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::DialogueChoice { .. } = command else { return };
    engine.send_error(session_id, "You are not in a conversation.");
}

fn ansi(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Ansi { enabled } = command else { return };
    if let Some(player) = engine.players.get_mut(session_id) {
        player.ansi_enabled = enabled;
    }
    engine.emit(session_id, Outbound::SetAnsi(enabled));
    if enabled {
        engine.send_info(session_id, "ANSI color enabled.");
        engine.emit(session_id, Outbound::ShowAnsiDemo);
    } else {
        engine.send_info(session_id, "ANSI color disabled.");
    }
}

fn clear(engine: &mut Engine, session_id: SessionId, _command: Command) {
    engine.emit(session_id, Outbound::ClearScreen);
}

fn help(engine: &mut Engine, session_id: SessionId, _command: Command) {
    engine.send_info(session_id, "Commands:");
    for line in [
        "  look, stats, inventory, who",
        "  say <msg>, '<msg>, gossip <msg>, tell <player> <msg>",
        "  north/south/east/west/up/down (or n/s/e/w/u/d)",
        "  get/drop/equip/remove <item>, attack <target>, flee",
        "  ansi on|off, clear, quit",
    ] {
        engine.send_text(session_id, line);
    }
}

fn quit(engine: &mut Engine, session_id: SessionId, _command: Command) {
    if let Some(player) = engine.players.get(session_id) {
        engine.db.save(player.record.clone());
    }
    engine.close_session(session_id, "quit");
}

fn require_staff(engine: &Engine, session_id: SessionId) -> bool {
    let is_staff = engine
        .players
        .get(session_id)
        .is_some_and(|p| p.record.is_staff);
    if !is_staff {
        engine.send_error(session_id, "You do not have the authority.");
    }
    is_staff
}

fn kick(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Kick { target } = command else { return };
    if !require_staff(engine, session_id) {
        return;
    }
    if let Some(target_session) = engine.players.session_by_name(&target) {
        info!(target, "staff kick");
        engine.close_session(target_session, "kicked by staff");
        engine.send_info(session_id, format!("{target} has been kicked."));
    } else if engine.sharding_enabled {
        engine
            .bus
            .broadcast(EngineMessage::KickRequest {
                target_name: target.clone(),
            });
        engine.send_info(session_id, format!("Kick for {target} sent to all engines."));
    } else {
        engine.send_error(session_id, "No such player.");
    }
}

fn shutdown(engine: &mut Engine, session_id: SessionId, _command: Command) {
    if !require_staff(engine, session_id) {
        return;
    }
    let initiator = engine
        .players
        .get(session_id)
        .map(|p| p.record.name.clone())
        .unwrap_or_default();
    warn!(initiator, "shutdown initiated");
    engine.bus.broadcast(EngineMessage::ShutdownRequest {
        initiator: initiator.clone(),
    });
    for other in engine.players.sessions() {
        engine.send_info(other, "The world is shutting down.");
    }
    engine.kill_switch.store(true, Ordering::Relaxed);
}

fn transfer(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Transfer { target, room } = command else { return };
    if !require_staff(engine, session_id) {
        return;
    }
    let Ok(room_id) = room.parse::<RoomId>() else {
        engine.send_error(session_id, "Rooms are named zone:room.");
        return;
    };
    let staff = engine
        .players
        .get(session_id)
        .map(|p| p.record.name.clone())
        .unwrap_or_default();

    if let Some(target_session) = engine.players.session_by_name(&target) {
        engine.send_info(session_id, format!("Transferring {target}..."));
        engine.transfer_to_room(target_session, room_id);
    } else if engine.sharding_enabled {
        engine.bus.broadcast(EngineMessage::TransferRequest {
            staff,
            target: target.clone(),
            target_room_id: room_id,
        });
        engine.send_info(session_id, format!("Transfer for {target} sent to all engines."));
    } else {
        engine.send_error(session_id, "No such player.");
    }
}

fn unknown(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Unknown { raw } = command else { return };
    engine.send_error(session_id, format!("Huh? '{raw}' is not a command. Try `help`."));
}

fn invalid(engine: &mut Engine, session_id: SessionId, command: Command) {
    let Command::Invalid { usage, .. } = command else { return };
    engine.send_error(session_id, format!("Usage: {usage}"));
}

use tether::{ARBITER_PEER, PeerId, Registry};

use crate::avatar::Avatar;

const SPEED: f32 = 5.0;
const TURN_RATE: f32 = 0.05;
const SCORE_INTERVAL: u32 = 30;

/// Moves every avatar `local_peer` is allowed to drive. Clients only drive
/// avatars whose pilot is enabled; the arbiter drives the ones it owns.
pub fn drive_avatars(registry: &mut Registry, local_peer: PeerId, frame: u32, dt: f32) -> usize {
    let mut driven = 0;
    for record in registry.iter_mut() {
        let (id, owner) = (record.id(), record.owner());
        if owner != local_peer {
            continue;
        }
        let Some(avatar) = record.downcast_mut::<Avatar>() else {
            continue;
        };
        if local_peer != ARBITER_PEER && !avatar.is_piloted() {
            continue;
        }

        if avatar.name.is_empty() {
            let name = if owner == ARBITER_PEER {
                format!("warden-{}", id)
            } else {
                format!("pilot-{}", owner)
            };
            avatar.rename(&name);
        }

        let heading = frame as f32 * TURN_RATE + id as f32;
        avatar.steer(heading, SPEED, dt);
        if frame % SCORE_INTERVAL == 0 {
            avatar.add_score(1);
        }
        driven += 1;
    }
    driven
}

/// Marks every avatar owned by `local_peer` for a full resend.
pub fn republish_avatars(registry: &mut Registry, local_peer: PeerId) -> usize {
    let mut touched = 0;
    for record in registry.iter_mut() {
        if record.owner() != local_peer {
            continue;
        }
        if let Some(avatar) = record.downcast_mut::<Avatar>() {
            avatar.touch();
            touched += 1;
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::{AVATAR_KIND, avatar_registry};

    #[test]
    fn arbiter_drives_only_what_it_owns() {
        let mut registry = avatar_registry();
        let warden = registry.spawn(AVATAR_KIND).unwrap();
        registry.spawn_owned(AVATAR_KIND, 2).unwrap();

        assert_eq!(drive_avatars(&mut registry, ARBITER_PEER, 0, 0.1), 1);
        let avatar = registry.get(warden).unwrap().downcast_ref::<Avatar>().unwrap();
        assert_eq!(avatar.name, format!("warden-{}", warden));
        assert_eq!(avatar.score, 1);
    }

    #[test]
    fn clients_need_an_enabled_pilot() {
        let mut registry = avatar_registry();
        let id = registry.spawn_owned(AVATAR_KIND, 2).unwrap();
        assert_eq!(drive_avatars(&mut registry, 2, 1, 0.1), 0);

        registry.get_mut(id).unwrap().sync_input(2);
        assert_eq!(drive_avatars(&mut registry, 2, 1, 0.1), 1);
    }

    #[test]
    fn republish_touches_owned_avatars_only() {
        let mut registry = avatar_registry();
        let mine = registry.spawn_owned(AVATAR_KIND, 4).unwrap();
        let theirs = registry.spawn_owned(AVATAR_KIND, 5).unwrap();

        assert_eq!(republish_avatars(&mut registry, 4), 1);
        assert!(registry.get(mine).unwrap().entity().has_pending_changes());
        assert!(!registry.get(theirs).unwrap().entity().has_pending_changes());
    }
}

//! 匿名昵称生成
//!
//! 由外部 ID 和尝试序号确定性地推导昵称，创建用户时再到存储中检查唯一性。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use domain::{RepositoryResult, UserId, UserRepository};

const ADJECTIVES: &[&str] = &[
    "Quiet", "Brave", "Curious", "Gentle", "Lucky", "Mellow", "Nimble", "Witty", "Sunny", "Calm",
    "Clever", "Bright", "Cosmic", "Dreamy", "Fuzzy", "Jolly", "Misty", "Rapid", "Silent", "Velvet",
];

const ANIMALS: &[&str] = &[
    "Fox", "Otter", "Panda", "Falcon", "Koala", "Lynx", "Heron", "Badger", "Dolphin", "Owl",
    "Raven", "Tiger", "Wolf", "Seal", "Crane", "Gecko", "Moose", "Bison", "Hare", "Yak",
];

/// 唯一性检查的最大尝试次数；用尽后在昵称后追加 ID 片段
pub const MAX_NAME_ATTEMPTS: u32 = 8;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// 第 `attempt` 个候选昵称，对同一输入始终相同
pub fn candidate(user_id: &UserId, attempt: u32) -> String {
    let seed = fnv1a(user_id.as_str().as_bytes()) ^ u64::from(attempt).rotate_left(32);
    let mut rng = StdRng::seed_from_u64(seed);
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let animal = ANIMALS[rng.random_range(0..ANIMALS.len())];
    let number: u16 = rng.random_range(10..100);
    format!("{adjective} {animal} {number}")
}

/// 生成存储中尚未使用的昵称
pub async fn generate_unique(
    users: &dyn UserRepository,
    user_id: &UserId,
) -> RepositoryResult<String> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = candidate(user_id, attempt);
        if !users.display_name_exists(&name).await? {
            return Ok(name);
        }
    }
    let suffix = format!("{:04x}", fnv1a(user_id.as_str().as_bytes()) & 0xffff);
    Ok(format!("{} {suffix}", candidate(user_id, 0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use chrono::Utc;
    use domain::User;

    #[test]
    fn candidates_are_deterministic() {
        let id = UserId::parse("psid-42").unwrap();
        assert_eq!(candidate(&id, 0), candidate(&id, 0));
        assert_eq!(candidate(&id, 3), candidate(&id, 3));
        assert_eq!(candidate(&id, 0).split(' ').count(), 3);
    }

    #[tokio::test]
    async fn taken_names_are_skipped() {
        let store = InMemoryStore::new();
        let id = UserId::parse("psid-42").unwrap();
        let first = candidate(&id, 0);

        let other = User::new(UserId::parse("someone-else").unwrap(), first.clone(), Utc::now());
        store.users().create(other).await.unwrap();

        let generated = generate_unique(store.users().as_ref(), &id).await.unwrap();
        assert_ne!(generated, first);
    }
}

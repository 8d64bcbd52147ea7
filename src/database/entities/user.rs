//! Persistent user account model and its fixed-size record form.

use crate::database::record::{self, RecordError, RecordResult};
use crate::utils::hashing::PasswordScheme;
use crate::utils::types::{OrderId, UserId};
use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

/// Signature word marking a live user record ('PLAY')
pub const USER_RECORD_SIGNATURE: u32 = 0x504c4159;
/// Serialized size of one user record
pub const USER_RECORD_SIZE: usize = 1024;

pub const MAXIMUM_LOGIN_LENGTH: usize = 15;
pub const MAXIMUM_PLAYER_NAME_LENGTH: usize = 31;
pub const MAXIMUM_PASSWORD_HASH_LENGTH: usize = 127;
pub const MAXIMUM_SALT_LENGTH: usize = 16;
/// Bound on the buddy list
pub const MAXIMUM_BUDDIES: usize = 8;
/// Score rows tracked per user beyond the overall rows
pub const NUMBER_OF_TRACKED_GAME_TYPES: usize = 16;

bitflags! {
    /// Account status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UserFlags: u32 {
        const ADMIN = 1 << 0;
        const EMPLOYEE = 1 << 1;
        const BANNED = 1 << 2;
        const KIOSK = 1 << 3;
    }
}

/// The caste ladder: twelve normal tiers derived from points plus the
/// fixed-occupancy named tiers at the top
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum Caste {
    Dagger = 0,
    DaggerWithHilt = 1,
    KrisKnife = 2,
    SwordAndDagger = 3,
    CrossedSwords = 4,
    CrossedAxes = 5,
    Shield = 6,
    ShieldCrossedSwords = 7,
    ShieldCrossedAxes = 8,
    SimpleCrown = 9,
    Crown = 10,
    NiceCrown = 11,
    EclipsedMoon = 12,
    Moon = 13,
    EclipsedSun = 14,
    Sun = 15,
    Comet = 16,
}

pub const NUMBER_OF_NORMAL_CASTES: usize = 12;
pub const NUMBER_OF_CASTES: usize = 17;

impl Caste {
    pub fn from_index(value: u8) -> Option<Caste> {
        Some(match value {
            0 => Caste::Dagger,
            1 => Caste::DaggerWithHilt,
            2 => Caste::KrisKnife,
            3 => Caste::SwordAndDagger,
            4 => Caste::CrossedSwords,
            5 => Caste::CrossedAxes,
            6 => Caste::Shield,
            7 => Caste::ShieldCrossedSwords,
            8 => Caste::ShieldCrossedAxes,
            9 => Caste::SimpleCrown,
            10 => Caste::Crown,
            11 => Caste::NiceCrown,
            12 => Caste::EclipsedMoon,
            13 => Caste::Moon,
            14 => Caste::EclipsedSun,
            15 => Caste::Sun,
            16 => Caste::Comet,
            _ => return None,
        })
    }

    /// Whether this is one of the fixed-occupancy top tiers
    pub fn is_named(&self) -> bool {
        (*self as u8) >= NUMBER_OF_NORMAL_CASTES as u8
    }
}

/// The canonical score row. One shape serves the overall ranked and
/// unranked rows, the per-game-type rows and order aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScoreRecord {
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub damage_inflicted: u32,
    pub damage_received: u32,
    pub disconnects: u32,
    /// Signed internally; clamped only when surfaced
    pub points: i32,
    pub highest_points: i32,
    pub numerical_rank: u32,
}

impl ScoreRecord {
    /// Points as surfaced to clients, floored at zero
    pub fn display_points(&self) -> u32 {
        self.points.max(0) as u32
    }

    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.games_played);
        dst.put_u32_le(self.wins);
        dst.put_u32_le(self.losses);
        dst.put_u32_le(self.ties);
        dst.put_u32_le(self.damage_inflicted);
        dst.put_u32_le(self.damage_received);
        dst.put_u32_le(self.disconnects);
        dst.put_i32_le(self.points);
        dst.put_i32_le(self.highest_points);
        dst.put_u32_le(self.numerical_rank);
    }

    pub fn read(src: &mut Bytes) -> RecordResult<ScoreRecord> {
        Ok(ScoreRecord {
            games_played: record::read_u32(src)?,
            wins: record::read_u32(src)?,
            losses: record::read_u32(src)?,
            ties: record::read_u32(src)?,
            damage_inflicted: record::read_u32(src)?,
            damage_received: record::read_u32(src)?,
            disconnects: record::read_u32(src)?,
            points: record::read_i32(src)?,
            highest_points: record::read_i32(src)?,
            numerical_rank: record::read_u32(src)?,
        })
    }
}

/// A persistent user account. Never deleted; banning sets a flag and
/// an expiry timestamp instead.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Monotonic id assigned at creation
    pub id: UserId,
    /// Unique login, compared case-insensitively
    pub login: String,
    pub password_hash: String,
    pub salt: Vec<u8>,
    pub scheme: PasswordScheme,
    pub display_name: String,
    pub flags: UserFlags,
    pub caste: Caste,
    /// Order membership, zero when unaffiliated
    pub order: OrderId,
    /// Unix seconds the ban lapses, zero when unbanned
    pub ban_until: i64,
    /// Unix seconds of the last successful login
    pub last_login_time: i64,
    /// Host-order address of the last successful login
    pub last_login_addr: u32,
    pub buddies: Vec<UserId>,
    pub unranked_score: ScoreRecord,
    pub ranked_score: ScoreRecord,
    pub ranked_score_by_game_type: [ScoreRecord; NUMBER_OF_TRACKED_GAME_TYPES],
}

impl User {
    /// Whether the account is currently barred from logging in
    pub fn is_banned(&self, now: i64) -> bool {
        self.flags.contains(UserFlags::BANNED) && (self.ban_until == 0 || now < self.ban_until)
    }

    /// Serializes this user into its fixed-size record form
    pub fn to_record(&self) -> BytesMut {
        let mut dst = BytesMut::with_capacity(USER_RECORD_SIZE);
        dst.put_u32_le(USER_RECORD_SIGNATURE);
        dst.put_u32_le(self.id);
        record::write_fixed_string(&mut dst, &self.login, MAXIMUM_LOGIN_LENGTH);
        record::write_fixed_string(&mut dst, &self.display_name, MAXIMUM_PLAYER_NAME_LENGTH);
        record::write_fixed_string(&mut dst, &self.password_hash, MAXIMUM_PASSWORD_HASH_LENGTH);
        record::write_fixed_bytes(&mut dst, &self.salt, MAXIMUM_SALT_LENGTH);
        dst.put_u8(self.scheme as u8);
        dst.put_u32_le(self.flags.bits());
        dst.put_u8(self.caste as u8);
        dst.put_u32_le(self.order);
        dst.put_i64_le(self.ban_until);
        dst.put_i64_le(self.last_login_time);
        dst.put_u32_le(self.last_login_addr);
        dst.put_u8(self.buddies.len().min(MAXIMUM_BUDDIES) as u8);
        for slot in 0..MAXIMUM_BUDDIES {
            dst.put_u32_le(self.buddies.get(slot).copied().unwrap_or(0));
        }
        self.unranked_score.write(&mut dst);
        self.ranked_score.write(&mut dst);
        for row in &self.ranked_score_by_game_type {
            row.write(&mut dst);
        }
        record::write_padding(&mut dst, USER_RECORD_SIZE);
        dst
    }

    /// Deserializes a user from its record form
    pub fn from_record(mut src: Bytes) -> RecordResult<User> {
        let signature = record::read_u32(&mut src)?;
        if signature != USER_RECORD_SIGNATURE {
            return Err(RecordError::BadSignature(signature));
        }
        let id = record::read_u32(&mut src)?;
        let login = record::read_fixed_string(&mut src, MAXIMUM_LOGIN_LENGTH)?;
        let display_name = record::read_fixed_string(&mut src, MAXIMUM_PLAYER_NAME_LENGTH)?;
        let password_hash = record::read_fixed_string(&mut src, MAXIMUM_PASSWORD_HASH_LENGTH)?;
        let salt = record::read_fixed_bytes(&mut src, MAXIMUM_SALT_LENGTH)?;
        let scheme = PasswordScheme::from_tag(record::read_u8(&mut src)?)
            .ok_or(RecordError::OutOfRange("password scheme"))?;
        let flags = UserFlags::from_bits_truncate(record::read_u32(&mut src)?);
        let caste = Caste::from_index(record::read_u8(&mut src)?)
            .ok_or(RecordError::OutOfRange("caste"))?;
        let order = record::read_u32(&mut src)?;
        let ban_until = record::read_i64(&mut src)?;
        let last_login_time = record::read_i64(&mut src)?;
        let last_login_addr = record::read_u32(&mut src)?;

        let buddy_count = record::read_u8(&mut src)? as usize;
        if buddy_count > MAXIMUM_BUDDIES {
            return Err(RecordError::OutOfRange("buddy count"));
        }
        let mut buddies = Vec::with_capacity(buddy_count);
        for slot in 0..MAXIMUM_BUDDIES {
            let value = record::read_u32(&mut src)?;
            if slot < buddy_count {
                buddies.push(value);
            }
        }

        let unranked_score = ScoreRecord::read(&mut src)?;
        let ranked_score = ScoreRecord::read(&mut src)?;
        let mut ranked_score_by_game_type = [ScoreRecord::default(); NUMBER_OF_TRACKED_GAME_TYPES];
        for row in ranked_score_by_game_type.iter_mut() {
            *row = ScoreRecord::read(&mut src)?;
        }

        Ok(User {
            id,
            login,
            password_hash,
            salt,
            scheme,
            display_name,
            flags,
            caste,
            order,
            ban_until,
            last_login_time,
            last_login_addr,
            buddies,
            unranked_score,
            ranked_score,
            ranked_score_by_game_type,
        })
    }
}

/// Fields supplied when creating an account; everything else starts at
/// its default
pub struct NewUser {
    pub login: String,
    pub display_name: String,
    pub password_hash: String,
    pub salt: Vec<u8>,
    pub scheme: PasswordScheme,
    pub flags: UserFlags,
}

impl NewUser {
    /// Builds the stored user once the store has assigned an id
    pub fn into_user(self, id: UserId) -> User {
        User {
            id,
            login: self.login,
            password_hash: self.password_hash,
            salt: self.salt,
            scheme: self.scheme,
            display_name: self.display_name,
            flags: self.flags,
            caste: Caste::Dagger,
            order: 0,
            ban_until: 0,
            last_login_time: 0,
            last_login_addr: 0,
            buddies: Vec::new(),
            unranked_score: ScoreRecord::default(),
            ranked_score: ScoreRecord::default(),
            ranked_score_by_game_type: [ScoreRecord::default(); NUMBER_OF_TRACKED_GAME_TYPES],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_user() -> User {
        let mut user = NewUser {
            login: "alice".to_string(),
            display_name: "Alice of Madrigal".to_string(),
            password_hash: "$2b$12$abcdefghijklmnopqrstuv".to_string(),
            salt: vec![1, 2, 3, 4],
            scheme: PasswordScheme::Bcrypt,
            flags: UserFlags::ADMIN,
        }
        .into_user(7);
        user.caste = Caste::Shield;
        user.order = 3;
        user.buddies = vec![9, 12];
        user.ranked_score.points = -2;
        user.ranked_score.games_played = 17;
        user.ranked_score_by_game_type[4].wins = 3;
        user
    }

    #[test]
    fn test_record_round_trip() {
        let user = sample_user();
        let record = user.to_record();
        assert_eq!(record.len(), USER_RECORD_SIZE);

        let loaded = User::from_record(record.clone().freeze()).unwrap();
        assert_eq!(loaded, user);

        // Byte-for-byte stable across a second round trip
        assert_eq!(loaded.to_record(), record);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let mut record = sample_user().to_record();
        record[0] = 0;
        assert!(matches!(
            User::from_record(record.freeze()),
            Err(RecordError::BadSignature(_))
        ));
    }

    #[test]
    fn test_display_points_floor() {
        let mut score = ScoreRecord::default();
        score.points = -4;
        assert_eq!(score.display_points(), 0);
        score.points = 12;
        assert_eq!(score.display_points(), 12);
    }

    #[test]
    fn test_ban_expiry() {
        let mut user = sample_user();
        user.flags |= UserFlags::BANNED;
        user.ban_until = 1_000;
        assert!(user.is_banned(999));
        assert!(!user.is_banned(1_001));
        // Zero expiry means a permanent ban
        user.ban_until = 0;
        assert!(user.is_banned(i64::MAX - 1));
    }
}

//! Client-generated, time-ordered store keys.
//!
//! A push id is 20 characters: 8 characters encoding the creation time in
//! milliseconds followed by 12 random characters. Ids generated later sort
//! after ids generated earlier; ids generated within the same millisecond
//! increment the random suffix so ordering still holds.

use crate::Timestamp;
use rand::Rng;
use std::sync::Mutex;

/// Alphabet in ascending ASCII order so string comparison matches time order.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

static GENERATOR: Mutex<PushIdGenerator> = Mutex::new(PushIdGenerator::new());

/// Generates a push id from the process-wide generator.
pub fn push_id() -> String {
    let mut generator = GENERATOR
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    generator.next_id(Timestamp::now().as_millis())
}

/// Stateful push id generator.
#[derive(Debug, Clone)]
pub struct PushIdGenerator {
    last_millis: i64,
    last_random: [u8; RANDOM_CHARS],
}

impl PushIdGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_millis: i64::MIN,
            last_random: [0; RANDOM_CHARS],
        }
    }

    /// Produces the next id for the given wall-clock time.
    pub fn next_id(&mut self, now_millis: i64) -> String {
        if now_millis == self.last_millis {
            self.increment_random();
        } else {
            let mut rng = rand::thread_rng();
            for slot in &mut self.last_random {
                *slot = rng.gen_range(0..64);
            }
        }
        self.last_millis = now_millis;

        let mut time_part = [0u8; TIME_CHARS];
        let mut remaining = now_millis.max(0) as u64;
        for slot in time_part.iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }

        let mut id = String::with_capacity(TIME_CHARS + RANDOM_CHARS);
        id.extend(time_part.iter().map(|&b| b as char));
        id.extend(self.last_random.iter().map(|&i| PUSH_CHARS[i as usize] as char));
        id
    }

    fn increment_random(&mut self) {
        for slot in self.last_random.iter_mut().rev() {
            if *slot == 63 {
                *slot = 0;
            } else {
                *slot += 1;
                return;
            }
        }
    }
}

impl Default for PushIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

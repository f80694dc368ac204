use rand::Rng;
use tracing::debug;

use crate::error::{GifError, Result};
use crate::gif::Gif;
use crate::settings::SettingsHandle;
use crate::store::GifStore;

/// Picks the next gif to show.
#[derive(Clone)]
pub struct Selector {
    store: GifStore,
    settings: SettingsHandle,
    max_attempts: usize,
    max_rejections: usize,
}

impl Selector {
    pub fn new(
        store: GifStore,
        settings: SettingsHandle,
        max_attempts: usize,
        max_rejections: usize,
    ) -> Self {
        Self {
            store,
            settings,
            max_attempts,
            max_rejections,
        }
    }

    /// A random gif from an enabled feed, preferring ones not viewed lately.
    pub async fn random(&self) -> Result<Gif> {
        let candidates = self.candidates().await?;
        pick(
            &candidates,
            &mut rand::thread_rng(),
            self.max_attempts,
            self.max_rejections,
        )
        .cloned()
        .ok_or(GifError::EmptyPool)
    }

    async fn candidates(&self) -> Result<Vec<Gif>> {
        let settings = self.settings.get().await;
        let pool = self.store.pool().await?;
        let total = pool.len();
        let candidates: Vec<Gif> = pool
            .into_iter()
            .filter(|g| settings.is_enabled(&g.feed))
            .collect();
        debug!("{} of {} gifs are from enabled feeds", candidates.len(), total);
        Ok(candidates)
    }
}

/// Draw uniformly, redrawing records in history until `max_rejections`
/// of them have been turned down. Gives up after `max_attempts` draws and
/// returns the last one.
pub(crate) fn pick<'a, R: Rng + ?Sized>(
    candidates: &'a [Gif],
    rng: &mut R,
    max_attempts: usize,
    max_rejections: usize,
) -> Option<&'a Gif> {
    if candidates.is_empty() {
        return None;
    }
    let mut rejections = 0;
    let mut drawn = None;
    for _ in 0..max_attempts.max(1) {
        let gif = &candidates[rng.gen_range(0..candidates.len())];
        drawn = Some(gif);
        if gif.history > 0 && rejections < max_rejections {
            rejections += 1;
            continue;
        }
        break;
    }
    drawn
}

//! Ordonnanceur de lecture sans trou
//!
//! Les buffers de réponse arrivent du réseau à des instants irréguliers et avec
//! des durées variables. Les jouer « dès réception » produit des clics. On tient
//! donc un curseur `next_start_time` sur l'horloge du périphérique de sortie :
//!
//! ```text
//! start = max(next_start_time, now + lookahead)
//! next_start_time = start + durée
//! ```
//!
//! Tant que les arrivées suivent le rythme de la lecture, les buffers s'enchaînent
//! bout à bout. Si le réseau prend du retard, le buffer suivant démarre à
//! `now + lookahead` et le trou est compté dans les statistiques.
//!
//! L'état (curseur + ensemble des buffers en vol) est un objet possédé, muté
//! uniquement par la tâche de session. Aucun verrou n'est nécessaire.

use std::collections::BTreeMap;

use crate::{AudioConfig, BufferId, PlaybackStats, ScheduledBuffer};

/// État d'ordonnancement de la sortie
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    /// Marge d'avance en secondes
    lookahead: f64,

    /// Instant où le prochain buffer peut démarrer (0 = rien de planifié)
    next_start_time: f64,

    /// Buffers planifiés et pas encore terminés
    live: BTreeMap<BufferId, ScheduledBuffer>,

    next_id: BufferId,

    stats: PlaybackStats,
}

impl PlaybackScheduler {
    /// Crée un ordonnanceur avec la marge d'avance donnée (en secondes)
    ///
    /// # Example
    /// ```rust
    /// use audio::PlaybackScheduler;
    ///
    /// let mut scheduler = PlaybackScheduler::new(0.05);
    /// let first = scheduler.schedule(0.5, 0.0);
    /// let second = scheduler.schedule(0.3, 0.1);
    /// assert_eq!(second.start_time, first.end_time());
    /// ```
    pub fn new(lookahead: f64) -> Self {
        Self {
            lookahead: lookahead.max(0.0),
            next_start_time: 0.0,
            live: BTreeMap::new(),
            next_id: 1,
            stats: PlaybackStats::default(),
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.lookahead_secs())
    }

    /// Planifie un buffer de durée `duration` reçu à l'instant `now`
    ///
    /// Retourne le créneau attribué. Le buffer est ajouté à l'ensemble vivant
    /// jusqu'à l'appel de [`complete`](Self::complete) ou d'une interruption.
    pub fn schedule(&mut self, duration: f64, now: f64) -> ScheduledBuffer {
        let buffer = self.reserve(duration, now);
        self.commit(buffer);
        buffer
    }

    /// Calcule le créneau du prochain buffer sans rien modifier
    ///
    /// À confirmer avec [`commit`](Self::commit) une fois le buffer
    /// réellement confié à la sortie.
    pub fn reserve(&self, duration: f64, now: f64) -> ScheduledBuffer {
        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        let earliest = now + self.lookahead;

        ScheduledBuffer {
            id: self.next_id,
            start_time: self.next_start_time.max(earliest),
            duration,
        }
    }

    /// Enregistre un créneau obtenu par [`reserve`](Self::reserve)
    pub fn commit(&mut self, buffer: ScheduledBuffer) {
        // Le curseur est passé derrière l'horloge : la lecture aura un trou
        if self.next_start_time > 0.0 && self.next_start_time < buffer.start_time {
            self.stats.underrun_gaps += 1;
        }

        self.next_id = self.next_id.max(buffer.id + 1);
        self.next_start_time = buffer.end_time();
        self.live.insert(buffer.id, buffer);

        self.stats.buffers_scheduled += 1;
        self.stats.scheduled_seconds += buffer.duration;
    }

    /// Marque un buffer comme terminé
    ///
    /// Retourne `false` si le buffer n'était plus vivant (déjà stoppé par une
    /// interruption par exemple).
    pub fn complete(&mut self, id: BufferId) -> bool {
        if self.live.remove(&id).is_some() {
            self.stats.buffers_completed += 1;
            true
        } else {
            false
        }
    }

    /// Interruption (barge-in) : vide l'ensemble vivant et remet le curseur à 0
    ///
    /// Retourne les buffers à stopper côté périphérique.
    pub fn interrupt(&mut self) -> Vec<BufferId> {
        self.stats.interruptions += 1;
        self.clear()
    }

    /// Vide l'ensemble vivant sans compter d'interruption (arrêt de session)
    pub fn clear(&mut self) -> Vec<BufferId> {
        let stopped: Vec<BufferId> = std::mem::take(&mut self.live).into_keys().collect();
        self.stats.buffers_stopped += stopped.len() as u64;
        self.next_start_time = 0.0;
        stopped
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn lookahead(&self) -> f64 {
        self.lookahead
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, id: BufferId) -> bool {
        self.live.contains_key(&id)
    }

    /// Buffers vivants, dans l'ordre de planification
    pub fn live_buffers(&self) -> impl Iterator<Item = &ScheduledBuffer> {
        self.live.values()
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }
}

mod admission;
mod availability;
mod eligibility;
mod error;
mod mutations;
mod queries;
mod schedule;
mod slots;

pub use availability::{filter_available, is_free, merge_any, slot_datetime, window_check};
pub use eligibility::{candidates_for, eligible_collaborators};
pub use error::EngineError;
pub use schedule::{expand_scope, resolve, validate_day, validate_week, ResolvedDay, ScheduleSource};
pub use slots::{generate_slots, Slots};

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::{DashMap, DashSet};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::DEFAULT_ADMISSION_TIMEOUT_MS;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::{Wal, WalHandle};

/// Settings, catalog and staff of one business. Guarded as a unit.
#[derive(Debug, Clone)]
pub struct BusinessState {
    pub business: Business,
    pub services: BTreeMap<Ulid, Service>,
    pub collaborators: BTreeMap<Ulid, Collaborator>,
    /// service id → linked collaborator ids
    pub links: BTreeMap<Ulid, BTreeSet<Ulid>>,
}

impl BusinessState {
    fn new(business: Business) -> Self {
        Self {
            business,
            services: BTreeMap::new(),
            collaborators: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn overrides_mut(&mut self, owner: ScheduleOwner) -> Option<&mut OverrideMap> {
        match owner {
            ScheduleOwner::Business(id) if id == self.business.id => Some(&mut self.business.overrides),
            ScheduleOwner::Business(_) => None,
            ScheduleOwner::Collaborator(id) => self.collaborators.get_mut(&id).map(|c| &mut c.overrides),
        }
    }
}

/// One collaborator's appointments, per date, sorted by start.
#[derive(Debug, Clone)]
pub struct AppointmentBook {
    pub collaborator_id: Ulid,
    days: BTreeMap<NaiveDate, Vec<Appointment>>,
}

impl AppointmentBook {
    pub fn new(collaborator_id: Ulid) -> Self {
        Self {
            collaborator_id,
            days: BTreeMap::new(),
        }
    }

    pub fn on(&self, date: NaiveDate) -> &[Appointment] {
        self.days.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count_blocking(&self, date: NaiveDate) -> usize {
        self.on(date).iter().filter(|a| a.blocks()).count()
    }

    pub fn insert(&mut self, appt: Appointment) {
        let day = self.days.entry(appt.date).or_default();
        let pos = day.partition_point(|a| a.span.start <= appt.span.start);
        day.insert(pos, appt);
    }

    pub fn get(&self, date: NaiveDate, id: Ulid) -> Option<&Appointment> {
        self.on(date).iter().find(|a| a.id == id)
    }

    fn get_mut(&mut self, date: NaiveDate, id: Ulid) -> Option<&mut Appointment> {
        self.days.get_mut(&date)?.iter_mut().find(|a| a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Appointment> {
        self.days.values().flatten()
    }
}

pub type SharedBusiness = Arc<RwLock<BusinessState>>;
pub type SharedBook = Arc<RwLock<AppointmentBook>>;

pub struct Engine {
    pub(super) businesses: DashMap<Ulid, SharedBusiness>,
    pub(super) slugs: DashMap<String, Ulid>,
    /// service / collaborator id → business id
    pub(super) owners: DashMap<Ulid, Ulid>,
    pub(super) books: DashMap<Ulid, SharedBook>,
    /// appointment id → (collaborator id, date)
    pub(super) appointments: DashMap<Ulid, (Ulid, NaiveDate)>,
    /// Appointment ids claimed by an admission that has not finished yet.
    pub(super) admitting: DashSet<Ulid>,
    pub(super) clients: DashMap<Ulid, Client>,
    pub(super) wal: WalHandle,
    /// Every mutation holds this shared across its journal append and apply;
    /// compaction takes it exclusively.
    pub(super) commit_gate: RwLock<()>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) admission_timeout: Duration,
}

/// Apply a business-scoped event (caller holds the write lock).
fn apply_to_business(bs: &mut BusinessState, event: &Event) {
    match event {
        Event::BusinessScheduleSet { schedule, .. } => bs.business.schedule = schedule.clone(),
        Event::BookingPolicySet { policy, .. } => bs.business.policy = *policy,
        Event::BusinessDisabled { .. } => bs.business.active = false,
        Event::ServiceCreated {
            id,
            business_id,
            name,
            duration_minutes,
            price_cents,
        } => {
            bs.services.insert(
                *id,
                Service {
                    id: *id,
                    business_id: *business_id,
                    name: name.clone(),
                    duration_minutes: *duration_minutes,
                    price_cents: *price_cents,
                    active: true,
                },
            );
        }
        Event::ServiceUpdated {
            id,
            name,
            duration_minutes,
            price_cents,
            active,
            ..
        } => {
            if let Some(s) = bs.services.get_mut(id) {
                s.name = name.clone();
                s.duration_minutes = *duration_minutes;
                s.price_cents = *price_cents;
                s.active = *active;
            }
        }
        Event::CollaboratorCreated { id, business_id, name } => {
            bs.collaborators.insert(
                *id,
                Collaborator {
                    id: *id,
                    business_id: *business_id,
                    name: name.clone(),
                    active: true,
                    schedule: None,
                    overrides: OverrideMap::new(),
                },
            );
        }
        Event::CollaboratorActiveSet { id, active, .. } => {
            if let Some(c) = bs.collaborators.get_mut(id) {
                c.active = *active;
            }
        }
        Event::CollaboratorScheduleSet { id, schedule, .. } => {
            if let Some(c) = bs.collaborators.get_mut(id) {
                c.schedule = schedule.clone();
            }
        }
        Event::EligibilityGranted {
            collaborator_id,
            service_id,
            ..
        } => {
            bs.links.entry(*service_id).or_default().insert(*collaborator_id);
        }
        Event::EligibilityRevoked {
            collaborator_id,
            service_id,
            ..
        } => {
            if let Some(set) = bs.links.get_mut(service_id) {
                set.remove(collaborator_id);
            }
        }
        Event::OverridesApplied { owner, dates, day, .. } => {
            if let Some(map) = bs.overrides_mut(*owner) {
                for date in dates {
                    map.insert(*date, day.clone());
                }
            }
        }
        Event::OverrideCleared { owner, date, .. } => {
            if let Some(map) = bs.overrides_mut(*owner) {
                map.remove(date);
            }
        }
        // Handled at the map level or by the appointment book.
        Event::BusinessCreated { .. }
        | Event::ClientCreated { .. }
        | Event::AppointmentAdmitted { .. }
        | Event::AppointmentStatusChanged { .. } => {}
    }
}

/// Apply an appointment event (caller holds the book's write lock).
/// Client stats are maintained here so they move in step with the book.
fn apply_to_book(
    book: &mut AppointmentBook,
    event: &Event,
    clients: &DashMap<Ulid, Client>,
    index: &DashMap<Ulid, (Ulid, NaiveDate)>,
) {
    match event {
        Event::AppointmentAdmitted { appointment } => {
            if let Some(client_id) = appointment.client_id()
                && let Some(mut client) = clients.get_mut(&client_id)
            {
                client.stats.record_admission(appointment);
            }
            index.insert(appointment.id, (book.collaborator_id, appointment.date));
            book.insert(appointment.clone());
        }
        Event::AppointmentStatusChanged { id, to, .. } => {
            let Some(date) = index.get(id).map(|e| e.value().1) else {
                return;
            };
            if let Some(appt) = book.get_mut(date, *id) {
                if let Some(client_id) = appt.client_id()
                    && let Some(mut client) = clients.get_mut(&client_id)
                {
                    client.stats.record_transition(appt.price_cents, appt.status, *to);
                }
                appt.status = *to;
            }
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = WalHandle::spawn(Wal::open(&wal_path)?);

        let engine = Self {
            businesses: DashMap::new(),
            slugs: DashMap::new(),
            owners: DashMap::new(),
            books: DashMap::new(),
            appointments: DashMap::new(),
            admitting: DashSet::new(),
            clients: DashMap::new(),
            wal,
            commit_gate: RwLock::new(()),
            notify,
            clock,
            admission_timeout: Duration::from_millis(DEFAULT_ADMISSION_TIMEOUT_MS),
        };

        // Sole owner of every Arc here, so try_write never contends. Blocking
        // lock calls are off limits: this can run inside the async runtime.
        for event in &events {
            engine.replay_event(event);
        }
        if !events.is_empty() {
            tracing::debug!(events = events.len(), path = %wal_path.display(), "journal replayed");
        }
        Ok(engine)
    }

    pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout = timeout;
        self
    }

    fn replay_event(&self, event: &Event) {
        self.apply_global(event);
        match event {
            Event::BusinessCreated { .. } | Event::ClientCreated { .. } => {}
            Event::AppointmentAdmitted { appointment } => {
                self.replay_into_book(appointment.collaborator_id, event);
            }
            Event::AppointmentStatusChanged { collaborator_id, .. } => {
                self.replay_into_book(*collaborator_id, event);
            }
            other => {
                if let Some(bs) = self.get_business(&other.business_id())
                    && let Ok(mut guard) = bs.try_write()
                {
                    apply_to_business(&mut guard, other);
                }
            }
        }
    }

    fn replay_into_book(&self, collaborator_id: Ulid, event: &Event) {
        if let Some(book) = self.get_book(&collaborator_id)
            && let Ok(mut guard) = book.try_write()
        {
            apply_to_book(&mut guard, event, &self.clients, &self.appointments);
        }
    }

    /// Map-level effects: entity creation and id indexes.
    fn apply_global(&self, event: &Event) {
        match event {
            Event::BusinessCreated {
                id,
                slug,
                name,
                schedule,
                policy,
            } => {
                let business = Business {
                    id: *id,
                    slug: slug.clone(),
                    name: name.clone(),
                    schedule: schedule.clone(),
                    overrides: OverrideMap::new(),
                    policy: *policy,
                    active: true,
                };
                self.businesses
                    .insert(*id, Arc::new(RwLock::new(BusinessState::new(business))));
                self.slugs.insert(slug.clone(), *id);
            }
            Event::ServiceCreated { id, business_id, .. } => {
                self.owners.insert(*id, *business_id);
            }
            Event::CollaboratorCreated { id, business_id, .. } => {
                self.owners.insert(*id, *business_id);
                self.books
                    .insert(*id, Arc::new(RwLock::new(AppointmentBook::new(*id))));
            }
            Event::ClientCreated {
                id,
                business_id,
                name,
                phone,
                email,
            } => {
                self.clients.insert(
                    *id,
                    Client {
                        id: *id,
                        business_id: *business_id,
                        name: name.clone(),
                        phone: phone.clone(),
                        email: email.clone(),
                        stats: ClientStats::default(),
                    },
                );
            }
            _ => {}
        }
    }

    /// Write an event through the group-commit writer. Callers hold `commit_gate`.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal.append(event.clone()).await?;
        Ok(())
    }

    /// Journal append, apply and notify for a business-scoped event.
    pub(super) async fn persist_and_apply(&self, bs: &mut BusinessState, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        self.apply_global(&event);
        apply_to_business(bs, &event);
        self.notify.send(event.business_id(), &event);
        Ok(())
    }

    /// Journal append and apply for an appointment event. Notification is left
    /// to the caller so it happens after the book locks are released.
    pub(super) async fn persist_to_book(&self, book: &mut AppointmentBook, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_book(book, event, &self.clients, &self.appointments);
        Ok(())
    }

    pub fn get_business(&self, id: &Ulid) -> Option<SharedBusiness> {
        self.businesses.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_book(&self, collaborator_id: &Ulid) -> Option<SharedBook> {
        self.books.get(collaborator_id).map(|e| e.value().clone())
    }

    /// Business owning a service or collaborator.
    pub fn owner_of(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.owners.get(entity_id).map(|e| *e.value())
    }

    pub(super) fn business_or_not_found(&self, id: &Ulid) -> Result<SharedBusiness, EngineError> {
        self.get_business(id).ok_or(EngineError::NotFound(*id))
    }

    /// Business lock for an entity id that may be the business itself or one of its members.
    pub(super) fn business_for_owner(&self, owner: ScheduleOwner) -> Result<SharedBusiness, EngineError> {
        match owner {
            ScheduleOwner::Business(id) => self.business_or_not_found(&id),
            ScheduleOwner::Collaborator(id) => {
                let business_id = self.owner_of(&id).ok_or(EngineError::NotFound(id))?;
                self.business_or_not_found(&business_id)
            }
        }
    }

    /// Classify a bare id as a business or collaborator schedule owner.
    pub fn schedule_owner(&self, id: Ulid) -> Result<ScheduleOwner, EngineError> {
        if self.businesses.contains_key(&id) {
            return Ok(ScheduleOwner::Business(id));
        }
        if self.books.contains_key(&id) {
            return Ok(ScheduleOwner::Collaborator(id));
        }
        Err(EngineError::NotFound(id))
    }

    pub fn now(&self) -> chrono::NaiveDateTime {
        self.clock.now()
    }
}

use std::fmt;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;

/// Steps of the public booking flow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WizardStep {
    SelectingService,
    SelectingCollaborator,
    SelectingDate,
    SelectingTime,
    Confirming,
    Booked,
}

impl WizardStep {
    fn previous(self) -> Option<WizardStep> {
        match self {
            WizardStep::SelectingService | WizardStep::Booked => None,
            WizardStep::SelectingCollaborator => Some(WizardStep::SelectingService),
            WizardStep::SelectingDate => Some(WizardStep::SelectingCollaborator),
            WizardStep::SelectingTime => Some(WizardStep::SelectingDate),
            WizardStep::Confirming => Some(WizardStep::SelectingTime),
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WizardStep::SelectingService => "selecting service",
            WizardStep::SelectingCollaborator => "selecting collaborator",
            WizardStep::SelectingDate => "selecting date",
            WizardStep::SelectingTime => "selecting time",
            WizardStep::Confirming => "confirming",
            WizardStep::Booked => "booked",
        };
        f.write_str(name)
    }
}

fn hhmm(t: &Minutes) -> String {
    format_hhmm(*t)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WizardError {
    #[error("expected {expected}, wizard is {actual}")]
    OutOfOrder { expected: WizardStep, actual: WizardStep },
    #[error("{} is not an available start time", hhmm(.0))]
    SlotUnavailable(Minutes),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// One client's walk through service, collaborator, date and time selection
/// for a single business. Every step is checked against the engine; the
/// final confirmation goes through admission like any other booking.
pub struct BookingWizard {
    engine: Arc<Engine>,
    business_id: Ulid,
    step: WizardStep,
    service_id: Option<Ulid>,
    collaborator: Option<CollaboratorChoice>,
    date: Option<NaiveDate>,
    start: Option<Minutes>,
    slots: Vec<BookableSlot>,
    appointment: Option<Appointment>,
}

impl BookingWizard {
    pub async fn start(engine: Arc<Engine>, business_id: Ulid) -> Result<Self, WizardError> {
        let business = engine
            .business(business_id)
            .await
            .ok_or(EngineError::NotFound(business_id))?;
        if !business.active {
            return Err(EngineError::BusinessDisabled(business_id).into());
        }
        Ok(Self {
            engine,
            business_id,
            step: WizardStep::SelectingService,
            service_id: None,
            collaborator: None,
            date: None,
            start: None,
            slots: Vec::new(),
            appointment: None,
        })
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn service_id(&self) -> Option<Ulid> {
        self.service_id
    }

    pub fn collaborator(&self) -> Option<CollaboratorChoice> {
        self.collaborator
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn start_time(&self) -> Option<Minutes> {
        self.start
    }

    /// Slots offered at the time step, as of the last refresh.
    pub fn available(&self) -> &[BookableSlot] {
        &self.slots
    }

    pub fn appointment(&self) -> Option<&Appointment> {
        self.appointment.as_ref()
    }

    /// Active services that at least one collaborator can perform.
    pub async fn services(&self) -> Result<Vec<Service>, WizardError> {
        let mut offered = Vec::new();
        for service in self.engine.list_services(self.business_id).await? {
            if service.active && !self.engine.eligible_collaborators(service.id).await?.is_empty() {
                offered.push(service);
            }
        }
        Ok(offered)
    }

    pub async fn select_service(&mut self, service_id: Ulid) -> Result<(), WizardError> {
        self.require_step(WizardStep::SelectingService)?;
        if self.engine.owner_of(&service_id) != Some(self.business_id) {
            return Err(EngineError::InvalidService(service_id).into());
        }
        if self.engine.eligible_collaborators(service_id).await?.is_empty() {
            return Err(EngineError::CollaboratorNotEligible { service: service_id }.into());
        }
        self.service_id = Some(service_id);
        self.collaborator = None;
        self.date = None;
        self.start = None;
        self.step = WizardStep::SelectingCollaborator;
        Ok(())
    }

    /// Collaborators the client may pick for the chosen service.
    pub async fn collaborator_options(&self) -> Result<Vec<Ulid>, WizardError> {
        let service_id = self.selected_service()?;
        Ok(self.engine.eligible_collaborators(service_id).await?)
    }

    pub async fn select_collaborator(&mut self, choice: CollaboratorChoice) -> Result<(), WizardError> {
        self.require_step(WizardStep::SelectingCollaborator)?;
        let service_id = self.selected_service()?;
        if let CollaboratorChoice::Specific(id) = choice
            && !self.engine.eligible_collaborators(service_id).await?.contains(&id)
        {
            return Err(EngineError::CollaboratorNotEligible { service: service_id }.into());
        }
        self.collaborator = Some(choice);
        self.date = None;
        self.start = None;
        self.step = WizardStep::SelectingDate;
        Ok(())
    }

    /// Accepts dates from today through the booking horizon and loads their slots.
    pub async fn select_date(&mut self, date: NaiveDate) -> Result<(), WizardError> {
        self.require_step(WizardStep::SelectingDate)?;
        let policy = self
            .engine
            .business(self.business_id)
            .await
            .ok_or(EngineError::NotFound(self.business_id))?
            .policy;
        let today = self.engine.now().date();
        if date < today {
            return Err(EngineError::OutsideAdvanceWindow.into());
        }
        let horizon = today
            .checked_add_days(Days::new(u64::from(policy.max_future_days)))
            .unwrap_or(NaiveDate::MAX);
        if date > horizon {
            return Err(EngineError::PastMaxFutureWindow(date).into());
        }
        self.date = Some(date);
        self.start = None;
        self.refresh().await?;
        self.step = WizardStep::SelectingTime;
        Ok(())
    }

    pub fn select_time(&mut self, start: Minutes) -> Result<(), WizardError> {
        self.require_step(WizardStep::SelectingTime)?;
        if !self.slots.iter().any(|s| s.span.start == start) {
            return Err(WizardError::SlotUnavailable(start));
        }
        self.start = Some(start);
        self.step = WizardStep::Confirming;
        Ok(())
    }

    /// Submit the booking. On a conflict the wizard drops back to time
    /// selection with fresh availability and returns the conflict.
    pub async fn confirm(&mut self, id: Ulid, client: ClientRef, notes: Option<String>) -> Result<&Appointment, WizardError> {
        self.require_step(WizardStep::Confirming)?;
        let (Some(service_id), Some(collaborator), Some(date), Some(start)) =
            (self.service_id, self.collaborator, self.date, self.start)
        else {
            return Err(WizardError::OutOfOrder {
                expected: WizardStep::Confirming,
                actual: self.step,
            });
        };
        let request = BookingRequest {
            business_id: self.business_id,
            service_id,
            collaborator,
            date,
            start,
            client,
            notes,
        };
        match self.engine.admit(id, request).await {
            Ok(appointment) => {
                self.step = WizardStep::Booked;
                Ok(self.appointment.insert(appointment))
            }
            Err(EngineError::SlotConflict) => {
                tracing::debug!(business = %self.business_id, %date, "slot taken during confirmation, refreshing");
                self.start = None;
                self.refresh().await?;
                self.step = WizardStep::SelectingTime;
                Err(EngineError::SlotConflict.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Step back one state. Selections already made are kept.
    pub fn back(&mut self) -> Result<WizardStep, WizardError> {
        let previous = self.step.previous().ok_or(WizardError::OutOfOrder {
            expected: WizardStep::SelectingCollaborator,
            actual: self.step,
        })?;
        self.step = previous;
        Ok(previous)
    }

    async fn refresh(&mut self) -> Result<(), WizardError> {
        let service_id = self.selected_service()?;
        let (Some(choice), Some(date)) = (self.collaborator, self.date) else {
            return Err(WizardError::OutOfOrder {
                expected: WizardStep::SelectingDate,
                actual: self.step,
            });
        };
        self.slots = self
            .engine
            .available_slots(self.business_id, service_id, choice, date)
            .await?;
        Ok(())
    }

    fn selected_service(&self) -> Result<Ulid, WizardError> {
        self.service_id.ok_or(WizardError::OutOfOrder {
            expected: WizardStep::SelectingService,
            actual: self.step,
        })
    }

    fn require_step(&self, expected: WizardStep) -> Result<(), WizardError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(WizardError::OutOfOrder {
                expected,
                actual: self.step,
            })
        }
    }
}

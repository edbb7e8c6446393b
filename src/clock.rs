use chrono::NaiveDateTime;

/// Source of the current local date and time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock in the local timezone
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Settable clock for tests
#[cfg(test)]
pub struct FixedClock(std::sync::Mutex<NaiveDateTime>);

#[cfg(test)]
impl FixedClock {
    pub fn at(s: &str) -> Self {
        Self(std::sync::Mutex::new(parse_datetime(s)))
    }

    pub fn set(&self, s: &str) {
        *self.0.lock().unwrap() = parse_datetime(s);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

/// `YYYY-MM-DD HH:MM` for test fixtures
#[cfg(test)]
pub fn parse_datetime(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

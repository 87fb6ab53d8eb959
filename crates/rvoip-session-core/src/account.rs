//! Registered identity (spec §3 "Account").

use rvoip_sip_types::uri::SipUri;

/// Registration lifecycle, spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    None,
    Registering,
    Reregistering,
    Registered,
    Unregistering,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub realm: Option<String>,
}

/// Cached digest challenge from the last 401/407, reused on re-register and
/// on subsequent in-dialog requests without round-tripping an auth failure.
#[derive(Debug, Clone)]
pub struct CachedChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
}

/// A registered identity: credentials, proxy/transport, registration state,
/// optional presence handle (spec §3).
pub struct Account {
    id: u64,
    address_of_record: SipUri,
    proxy: Option<SipUri>,
    credentials: Credentials,
    state: RegistrationState,
    cached_challenge: Option<CachedChallenge>,
    presence_handle: Option<u64>,
}

impl Account {
    pub fn new(id: u64, address_of_record: SipUri, proxy: Option<SipUri>, credentials: Credentials) -> Self {
        Self {
            id,
            address_of_record,
            proxy,
            credentials,
            state: RegistrationState::None,
            cached_challenge: None,
            presence_handle: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address_of_record(&self) -> &SipUri {
        &self.address_of_record
    }

    pub fn proxy(&self) -> Option<&SipUri> {
        self.proxy.as_ref()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn set_user_info(&mut self, address_of_record: SipUri) {
        self.address_of_record = address_of_record;
    }

    pub fn cache_challenge(&mut self, challenge: CachedChallenge) {
        self.cached_challenge = Some(challenge);
    }

    pub fn cached_challenge(&self) -> Option<&CachedChallenge> {
        self.cached_challenge.as_ref()
    }

    pub fn presence_handle(&self) -> Option<u64> {
        self.presence_handle
    }

    pub fn set_presence_handle(&mut self, handle: Option<u64>) {
        self.presence_handle = handle;
    }

    /// Begins (re-)registration. Legal from any state except mid-flight
    /// transitions the caller is already driving.
    pub fn start_registering(&mut self) {
        self.state = match self.state {
            RegistrationState::Registered => RegistrationState::Reregistering,
            _ => RegistrationState::Registering,
        };
    }

    pub fn mark_registered(&mut self) {
        self.state = RegistrationState::Registered;
    }

    /// Releases the registration handle before the account (and ultimately
    /// the user agent) tears down signaling (spec §3 "Ownership").
    pub fn start_unregistering(&mut self) {
        self.state = RegistrationState::Unregistering;
    }

    pub fn mark_unregistered(&mut self) {
        self.state = RegistrationState::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvoip_sip_types::uri::parse_sip_address;

    fn account() -> Account {
        Account::new(
            1,
            parse_sip_address("sip:alice@example.com").unwrap(),
            None,
            Credentials { username: "alice".to_string(), password: "secret".to_string(), realm: None },
        )
    }

    #[test]
    fn re_register_from_registered_goes_to_reregistering() {
        let mut acc = account();
        acc.mark_registered();
        acc.start_registering();
        assert_eq!(acc.state(), RegistrationState::Reregistering);
    }

    #[test]
    fn first_register_from_none_goes_to_registering() {
        let mut acc = account();
        acc.start_registering();
        assert_eq!(acc.state(), RegistrationState::Registering);
    }
}

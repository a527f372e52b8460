//! ---
//! corelay_section: "02-messaging-envelopes"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Typed classification of operation descriptors."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
//! Operation descriptors are opaque to the relay except for one fact: whether
//! executing them requires a credential. That fact is attached to a small set
//! of known operation kinds, looked up by the descriptor's root operation names.
//! A descriptor with several roots runs without a credential only when all of
//! them are exempt.

use std::fmt;

/// Whether an operation may run without a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthRequirement {
    /// Runs without a credential (login/registration class).
    Exempt,
    /// Requires a bearer credential.
    Required,
}

/// Known operation kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Exchange user credentials for a token.
    Login,
    /// Create an account.
    Register,
    /// Alias of [`OperationKind::Register`] used by older clients.
    Signup,
    /// Any other operation, identified by its root name.
    Other(String),
}

impl OperationKind {
    /// Map a root operation name onto a kind. Matching is exact and case-sensitive.
    pub fn from_name(name: &str) -> Self {
        match name {
            "login" => OperationKind::Login,
            "register" => OperationKind::Register,
            "signup" => OperationKind::Signup,
            other => OperationKind::Other(other.to_owned()),
        }
    }

    /// Authentication requirement carried by this kind.
    pub fn auth_requirement(&self) -> AuthRequirement {
        match self {
            OperationKind::Login | OperationKind::Register | OperationKind::Signup => {
                AuthRequirement::Exempt
            }
            OperationKind::Other(_) => AuthRequirement::Required,
        }
    }

    /// Root operation name.
    pub fn name(&self) -> &str {
        match self {
            OperationKind::Login => "login",
            OperationKind::Register => "register",
            OperationKind::Signup => "signup",
            OperationKind::Other(name) => name,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised when a descriptor names no operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// Descriptor is empty or whitespace.
    #[error("operation descriptor is empty")]
    Empty,
    /// No root operation name could be found.
    #[error("no operation name found in descriptor")]
    Unnamed,
}

/// A classified operation descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation<'a> {
    descriptor: &'a str,
    roots: Vec<OperationKind>,
}

impl<'a> Operation<'a> {
    /// Classify a descriptor by its root operation names.
    ///
    /// Bare names (`"login"`, `"updateRole(userId: 1)"`) are their own root. For
    /// GraphQL-style documents every field of every operation's top-level selection
    /// set is a root; aliases (`token: login(...)`) resolve to the aliased field and
    /// fragment definitions are skipped. A root-level fragment spread counts as a
    /// root that requires a credential.
    pub fn parse(descriptor: &'a str) -> Result<Self, OperationError> {
        let roots = root_operation_names(descriptor)?
            .into_iter()
            .map(OperationKind::from_name)
            .collect();
        Ok(Self { descriptor, roots })
    }

    /// Original descriptor text.
    pub fn descriptor(&self) -> &'a str {
        self.descriptor
    }

    /// Kind of the first root field.
    pub fn kind(&self) -> &OperationKind {
        // parse never yields an empty root list
        &self.roots[0]
    }

    /// Kinds of every root field, in document order.
    pub fn roots(&self) -> &[OperationKind] {
        &self.roots
    }

    /// First root that needs a credential, if any.
    pub fn protected_root(&self) -> Option<&OperationKind> {
        self.roots
            .iter()
            .find(|kind| kind.auth_requirement() == AuthRequirement::Required)
    }

    /// Exempt only when every root is exempt.
    pub fn auth_requirement(&self) -> AuthRequirement {
        match self.protected_root() {
            Some(_) => AuthRequirement::Required,
            None => AuthRequirement::Exempt,
        }
    }
}

const FRAGMENT_SPREAD: &str = "...";

fn root_operation_names(descriptor: &str) -> Result<Vec<&str>, OperationError> {
    let mut scanner = Scanner::new(descriptor);
    if scanner.peek().is_none() {
        return Err(OperationError::Empty);
    }

    let mut roots = Vec::new();
    let mut definitions = 0usize;
    while let Some(next) = scanner.peek() {
        if next == '{' {
            scanner.selection_roots(&mut roots)?;
        } else {
            let keyword = scanner.name().ok_or(OperationError::Unnamed)?;
            match keyword {
                "query" | "mutation" | "subscription" => {
                    scanner.definition_header()?;
                    scanner.selection_roots(&mut roots)?;
                }
                "fragment" => {
                    scanner.definition_header()?;
                    scanner.skip_group()?;
                }
                // a bare descriptor is a name with optional arguments and nothing else
                bare if definitions == 0 => {
                    if scanner.peek() == Some('(') {
                        scanner.skip_group()?;
                    }
                    if scanner.peek().is_some() {
                        return Err(OperationError::Unnamed);
                    }
                    return Ok(vec![bare]);
                }
                _ => return Err(OperationError::Unnamed),
            }
        }
        definitions += 1;
    }

    if roots.is_empty() {
        return Err(OperationError::Unnamed);
    }
    Ok(roots)
}

/// Cursor over a descriptor that skips whitespace, commas and `#` comments.
struct Scanner<'a> {
    source: &'a str,
    position: usize,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    fn rest(&self) -> &'a str {
        let source = self.source;
        &source[self.position..]
    }

    fn skip_ignored(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start_matches(|ch: char| ch.is_whitespace() || ch == ',');
            self.position += rest.len() - trimmed.len();
            if !trimmed.starts_with('#') {
                return;
            }
            self.position += trimmed.find('\n').map_or(trimmed.len(), |end| end + 1);
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ignored();
        self.rest().chars().next()
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ignored();
        if self.rest().starts_with(token) {
            self.position += token.len();
            true
        } else {
            false
        }
    }

    fn name(&mut self) -> Option<&'a str> {
        self.skip_ignored();
        let name = leading_name(self.rest())?;
        self.position += name.len();
        Some(name)
    }

    /// Skip an operation or fragment header up to its selection set.
    fn definition_header(&mut self) -> Result<(), OperationError> {
        loop {
            match self.peek() {
                Some('{') => return Ok(()),
                Some('(') => self.skip_group()?,
                Some('@') => {
                    self.position += 1;
                    self.name().ok_or(OperationError::Unnamed)?;
                }
                Some(_) => {
                    self.name().ok_or(OperationError::Unnamed)?;
                }
                None => return Err(OperationError::Unnamed),
            }
        }
    }

    /// Collect the root fields of the selection set at the cursor.
    fn selection_roots(&mut self, roots: &mut Vec<&'a str>) -> Result<(), OperationError> {
        if !self.eat("{") {
            return Err(OperationError::Unnamed);
        }
        loop {
            if self.eat("}") {
                return Ok(());
            }
            if self.eat(FRAGMENT_SPREAD) {
                roots.push(FRAGMENT_SPREAD);
                // `... on Type` carries a type condition
                if self.name() == Some("on") {
                    self.name().ok_or(OperationError::Unnamed)?;
                }
            } else {
                let field = self.name().ok_or(OperationError::Unnamed)?;
                let field = if self.eat(":") {
                    self.name().ok_or(OperationError::Unnamed)?
                } else {
                    field
                };
                roots.push(field);
            }
            self.skip_field_tail()?;
        }
    }

    /// Skip arguments, directives and a sub-selection following a field.
    fn skip_field_tail(&mut self) -> Result<(), OperationError> {
        loop {
            match self.peek() {
                Some('(') | Some('{') => self.skip_group()?,
                Some('@') => {
                    self.position += 1;
                    self.name().ok_or(OperationError::Unnamed)?;
                }
                Some(_) => return Ok(()),
                None => return Err(OperationError::Unnamed),
            }
        }
    }

    /// Skip a balanced `(...)`, `{...}` or `[...]` group, including strings and comments.
    fn skip_group(&mut self) -> Result<(), OperationError> {
        self.skip_ignored();
        let mut depth = 0usize;
        let mut chars = self.rest().char_indices();
        while let Some((offset, ch)) = chars.next() {
            match ch {
                '(' | '{' | '[' => depth += 1,
                ')' | '}' | ']' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.position += offset + ch.len_utf8();
                        return Ok(());
                    }
                }
                '"' => loop {
                    match chars.next() {
                        Some((_, '\\')) => {
                            chars.next();
                        }
                        Some((_, '"')) => break,
                        Some(_) => {}
                        None => return Err(OperationError::Unnamed),
                    }
                },
                '#' => {
                    for (_, skipped) in chars.by_ref() {
                        if skipped == '\n' {
                            break;
                        }
                    }
                }
                _ if depth == 0 => return Err(OperationError::Unnamed),
                _ => {}
            }
        }
        Err(OperationError::Unnamed)
    }
}

fn leading_name(input: &str) -> Option<&str> {
    let mut chars = input.char_indices();
    let (_, first) = chars.next()?;
    if !(first == '_' || first.is_ascii_alphabetic()) {
        return None;
    }
    let end = chars
        .find(|(_, ch)| !(*ch == '_' || ch.is_ascii_alphanumeric()))
        .map(|(offset, _)| offset)
        .unwrap_or(input.len());
    Some(&input[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(descriptor: &str) -> OperationKind {
        Operation::parse(descriptor).unwrap().kind().clone()
    }

    #[test]
    fn bare_names_classify_directly() {
        assert_eq!(kind_of("login"), OperationKind::Login);
        assert_eq!(kind_of("  register "), OperationKind::Register);
        assert_eq!(kind_of("signup(email: \"x\")"), OperationKind::Signup);
        assert_eq!(
            kind_of("updateRole"),
            OperationKind::Other("updateRole".into())
        );
    }

    #[test]
    fn graphql_documents_use_root_field() {
        let login = "mutation Mutation($email: String!, $password: String!) { login(email: $email, password: $password) { id token } }";
        assert_eq!(kind_of(login), OperationKind::Login);

        let users = "query { getUsers { id name role } }";
        assert_eq!(kind_of(users), OperationKind::Other("getUsers".into()));

        let shorthand = "{ getEmployee(id: \"1\") { FirstName } }";
        assert_eq!(kind_of(shorthand), OperationKind::Other("getEmployee".into()));
    }

    #[test]
    fn aliases_resolve_to_the_field() {
        assert_eq!(
            kind_of("mutation { session: login(email: \"a\") { token } }"),
            OperationKind::Login
        );
        assert_eq!(
            kind_of("mutation { login: updateUserRole(userId: 1) { id } }"),
            OperationKind::Other("updateUserRole".into())
        );
    }

    #[test]
    fn substrings_never_exempt_an_operation() {
        // an argument or nested field named `login` must not count
        let sneaky = "mutation { updateUserPassword(login: \"x\") { login(a: 1) } }";
        assert_eq!(
            Operation::parse(sneaky).unwrap().auth_requirement(),
            AuthRequirement::Required
        );
        assert_eq!(
            kind_of("notlogin(email: 1)"),
            OperationKind::Other("notlogin".into())
        );
        assert_eq!(kind_of("Login"), OperationKind::Other("Login".into()));
    }

    #[test]
    fn auth_requirements_are_static() {
        assert_eq!(OperationKind::Login.auth_requirement(), AuthRequirement::Exempt);
        assert_eq!(OperationKind::Register.auth_requirement(), AuthRequirement::Exempt);
        assert_eq!(OperationKind::Signup.auth_requirement(), AuthRequirement::Exempt);
        assert_eq!(
            OperationKind::Other("deleteEmployee".into()).auth_requirement(),
            AuthRequirement::Required
        );
    }

    #[test]
    fn unnamed_descriptors_are_rejected() {
        assert_eq!(Operation::parse("   "), Err(OperationError::Empty));
        assert_eq!(Operation::parse("{ }"), Err(OperationError::Unnamed));
        assert_eq!(Operation::parse("42"), Err(OperationError::Unnamed));
        assert_eq!(Operation::parse("query { : x }"), Err(OperationError::Unnamed));
        assert_eq!(Operation::parse("fragment F on User { id }"), Err(OperationError::Unnamed));
        assert_eq!(
            Operation::parse("login mutation { deleteEmployee(id: 1) { id } }"),
            Err(OperationError::Unnamed)
        );
        assert_eq!(Operation::parse("login(a: 1) extra"), Err(OperationError::Unnamed));
        assert_eq!(Operation::parse("mutation { login(a: \"x\" }"), Err(OperationError::Unnamed));
    }

    #[test]
    fn every_root_field_must_be_exempt() {
        let mixed = r#"mutation { login(email: "a") { token } updateUserRole(userId: "42", role: "Admin") { id } }"#;
        let operation = Operation::parse(mixed).unwrap();
        assert_eq!(
            operation.roots(),
            &[
                OperationKind::Login,
                OperationKind::Other("updateUserRole".into())
            ]
        );
        assert_eq!(operation.kind(), &OperationKind::Login);
        assert_eq!(operation.auth_requirement(), AuthRequirement::Required);
        assert_eq!(
            operation.protected_root(),
            Some(&OperationKind::Other("updateUserRole".into()))
        );

        // a second operation in the same document counts too
        let two_ops = "mutation A { login { token } } query B { getUsers { id } }";
        assert_eq!(
            Operation::parse(two_ops).unwrap().auth_requirement(),
            AuthRequirement::Required
        );

        let exempt = "mutation { login(email: \"a\") { token }, register(email: \"b\") { id } }";
        let operation = Operation::parse(exempt).unwrap();
        assert_eq!(operation.roots().len(), 2);
        assert_eq!(operation.auth_requirement(), AuthRequirement::Exempt);
        assert_eq!(operation.protected_root(), None);
    }

    #[test]
    fn fragment_definitions_are_skipped() {
        let document = "fragment Session on AuthPayload { token user { id } } mutation Login($email: String!) { login(email: $email) { ...Session } }";
        let operation = Operation::parse(document).unwrap();
        assert_eq!(operation.roots(), &[OperationKind::Login]);
        assert_eq!(operation.auth_requirement(), AuthRequirement::Exempt);

        // a fragment named like an exempt field does not exempt the operation
        let document = "fragment login on Mutation { login { token } } query { getUsers { id } }";
        assert_eq!(kind_of(document), OperationKind::Other("getUsers".into()));
    }

    #[test]
    fn root_fragment_spreads_require_a_credential() {
        let spread = "fragment Everything on Mutation { deleteEmployee(id: 1) { id } } mutation { login { token } ...Everything }";
        assert_eq!(
            Operation::parse(spread).unwrap().auth_requirement(),
            AuthRequirement::Required
        );

        let inline = "mutation { ... on Mutation { deleteEmployee(id: 1) { id } } login { token } }";
        let operation = Operation::parse(inline).unwrap();
        assert_eq!(operation.roots().len(), 2);
        assert_eq!(operation.auth_requirement(), AuthRequirement::Required);

        let followed = "mutation { ...F login { token } }";
        assert_eq!(Operation::parse(followed).unwrap().roots().len(), 2);
    }

    #[test]
    fn comments_are_ignored() {
        let document = "# fetch users\nquery {\n  # lookup\n  getUsers { id } # trailing\n}";
        assert_eq!(kind_of(document), OperationKind::Other("getUsers".into()));

        // commented-out roots are not roots
        let document = "mutation {\n  # login { token }\n  deleteEmployee(id: 1) { id }\n}";
        let operation = Operation::parse(document).unwrap();
        assert_eq!(
            operation.roots(),
            &[OperationKind::Other("deleteEmployee".into())]
        );

        // a comment inside arguments may contain closing brackets
        let document = "mutation {\n  login(email: \"a\" # ) }\n  ) { token }\n}";
        assert_eq!(kind_of(document), OperationKind::Login);
    }

    #[test]
    fn strings_may_contain_brackets() {
        let document = r#"mutation { login(email: "}{ \" )") { token } deleteEmployee(id: 1) { id } }"#;
        let operation = Operation::parse(document).unwrap();
        assert_eq!(operation.roots().len(), 2);
        assert_eq!(operation.auth_requirement(), AuthRequirement::Required);
    }
}

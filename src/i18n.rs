use crate::models::Language;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\w+)\}").expect("valid regex"));

type Dictionary = HashMap<&'static str, &'static str>;

static PT: Lazy<Dictionary> = Lazy::new(|| {
    HashMap::from([
        ("Untitled", "Sem título"),
        ("Group", "Grupo"),
        ("Program", "Programa"),
        ("Page", "Página"),
        ("Home", "Início"),
        ("General", "Geral"),
        ("Confirm Action", "Confirmar ação"),
        ("Continue", "Continuar"),
        ("Delete", "Excluir"),
        ("Delete page \"{name}\" and everything in it?", "Excluir a página \"{name}\" e tudo nela?"),
        ("Delete group \"{name}\" and everything in it?", "Excluir o grupo \"{name}\" e tudo nele?"),
        ("Delete link \"{name}\"?", "Excluir o link \"{name}\"?"),
        ("Delete program \"{name}\"?", "Excluir o programa \"{name}\"?"),
        ("Delete this widget?", "Excluir este widget?"),
        (
            "This will erase all pages, groups and links. Continue?",
            "Isso apagará todas as páginas, grupos e links. Continuar?",
        ),
        (
            "Exported file appears empty: no pages or no programs/widgets found. Check that changes were saved before exporting.",
            "O arquivo exportado parece vazio: nenhuma página ou nenhum programa/widget encontrado. Verifique se as alterações foram salvas antes de exportar.",
        ),
        ("Enter a category name to continue.", "Digite um nome de categoria para continuar."),
        ("Not a valid URL scheme. Edit the program to adjust.", "Esquema de URL inválido. Edite o programa para ajustar."),
        ("No native command set. Edit the program to add one.", "Nenhum comando nativo definido. Edite o programa para adicionar um."),
        ("The scan found no programs to add.", "A busca não encontrou programas para adicionar."),
        ("No log entries to export.", "Nenhum registro para exportar."),
        ("Service Operational", "Serviço operacional"),
        ("Service Down", "Serviço fora do ar"),
        ("Configure widget", "Configurar widget"),
        ("No monitors", "Nenhum monitor"),
        ("Rate limited…", "Limite de requisições…"),
        ("Failed", "Falhou"),
        ("Loading…", "Carregando…"),
        ("No items", "Nenhum item"),
        ("Feed unavailable", "Feed indisponível"),
        ("Not found", "Não encontrado"),
        ("Global", "Global"),
    ])
});

static ES: Lazy<Dictionary> = Lazy::new(|| {
    HashMap::from([
        ("Untitled", "Sin título"),
        ("Group", "Grupo"),
        ("Program", "Programa"),
        ("Page", "Página"),
        ("Home", "Inicio"),
        ("General", "General"),
        ("Confirm Action", "Confirmar acción"),
        ("Continue", "Continuar"),
        ("Delete", "Eliminar"),
        ("Delete page \"{name}\" and everything in it?", "¿Eliminar la página \"{name}\" y todo su contenido?"),
        ("Delete group \"{name}\" and everything in it?", "¿Eliminar el grupo \"{name}\" y todo su contenido?"),
        ("Delete link \"{name}\"?", "¿Eliminar el enlace \"{name}\"?"),
        ("Delete program \"{name}\"?", "¿Eliminar el programa \"{name}\"?"),
        ("Delete this widget?", "¿Eliminar este widget?"),
        (
            "This will erase all pages, groups and links. Continue?",
            "Esto borrará todas las páginas, grupos y enlaces. ¿Continuar?",
        ),
        (
            "Exported file appears empty: no pages or no programs/widgets found. Check that changes were saved before exporting.",
            "El archivo exportado parece vacío: no hay páginas o no hay programas/widgets. Comprueba que los cambios se guardaron antes de exportar.",
        ),
        ("Enter a category name to continue.", "Introduce un nombre de categoría para continuar."),
        ("Not a valid URL scheme. Edit the program to adjust.", "Esquema de URL no válido. Edita el programa para ajustarlo."),
        ("No native command set. Edit the program to add one.", "No hay comando nativo. Edita el programa para añadir uno."),
        ("The scan found no programs to add.", "El escaneo no encontró programas para añadir."),
        ("No log entries to export.", "No hay registros para exportar."),
        ("Service Operational", "Servicio operativo"),
        ("Service Down", "Servicio caído"),
        ("Configure widget", "Configurar widget"),
        ("No monitors", "Sin monitores"),
        ("Rate limited…", "Límite de solicitudes…"),
        ("Failed", "Error"),
        ("Loading…", "Cargando…"),
        ("No items", "Sin elementos"),
        ("Feed unavailable", "Feed no disponible"),
        ("Not found", "No encontrado"),
        ("Global", "Global"),
    ])
});

fn dictionary(lang: Language) -> Option<&'static Dictionary> {
    match lang {
        Language::En => None,
        Language::Pt => Some(&PT),
        Language::Es => Some(&ES),
    }
}

/// Looks up a phrase, falling back to the English source text.
pub fn t(lang: Language, phrase: &str) -> String {
    dictionary(lang)
        .and_then(|dict| dict.get(phrase).copied())
        .unwrap_or(phrase)
        .to_string()
}

/// Like [`t`], then substitutes `{key}` placeholders. Unknown keys become empty.
pub fn t_with(lang: Language, phrase: &str, replacements: &[(&str, &str)]) -> String {
    let template = t(lang, phrase);
    PLACEHOLDER
        .replace_all(&template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            replacements
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::{t, t_with};
    use crate::models::Language;

    #[test]
    fn english_is_identity_and_unknown_phrases_fall_back() {
        assert_eq!(t(Language::En, "Untitled"), "Untitled");
        assert_eq!(t(Language::Pt, "Untitled"), "Sem título");
        assert_eq!(t(Language::Es, "Something new"), "Something new");
    }

    #[test]
    fn placeholders_are_substituted() {
        let text = t_with(Language::En, "Delete page \"{name}\" and everything in it?", &[("name", "Work")]);
        assert_eq!(text, "Delete page \"Work\" and everything in it?");
        assert_eq!(t_with(Language::En, "{missing} ok", &[]), " ok");
    }
}
